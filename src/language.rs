//! Keyword-based guess of the target language of a prompt.

pub const DEFAULT_LANGUAGE: &str = "python";

/// Checked in order; the first language with a matching keyword wins.
const LANGUAGE_KEYWORDS: &[(&str, &[&str])] = &[
    ("python", &["python", "django", "flask", "pandas", "numpy", "fastapi"]),
    (
        "javascript",
        &["javascript", "js", "node", "nodejs", "react", "vue", "angular", "express"],
    ),
    ("typescript", &["typescript", "ts", "angular", "nest"]),
    ("java", &["java", "spring", "maven", "gradle"]),
    ("cpp", &["c++", "cpp"]),
    ("csharp", &["c#", "csharp", ".net", "dotnet", "asp.net"]),
    ("rust", &["rust", "cargo"]),
    ("go", &["go", "golang"]),
    ("php", &["php", "laravel", "symfony"]),
    ("ruby", &["ruby", "rails"]),
];

/// Returns the language a prompt most likely targets, or
/// [`DEFAULT_LANGUAGE`] when no keyword matches.
///
/// Keywords match whole words, so "go" does not fire on "google" and "ts"
/// does not fire on "lists". Dotted words are also checked piecewise, which
/// makes "node.js" count as "node" and "js".
pub fn detect_language(prompt: &str) -> &'static str {
    let lowered = prompt.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| c.is_whitespace() || ",;:!?()[]{}<>\"'/`-".contains(c))
        .map(|w| w.trim_end_matches('.'))
        .filter(|w| !w.is_empty())
        .collect();

    let matches = |keyword: &str| {
        words.iter().any(|word| {
            *word == keyword || (word.contains('.') && word.split('.').any(|part| part == keyword))
        })
    };

    LANGUAGE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|&k| matches(k)))
        .map(|(language, _)| *language)
        .unwrap_or(DEFAULT_LANGUAGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_by_keyword() {
        assert_eq!(detect_language("Build a Flask endpoint for uploads"), "python");
        assert_eq!(detect_language("a React hook that debounces input"), "javascript");
        assert_eq!(detect_language("parse CLI args with cargo features in mind"), "rust");
        assert_eq!(detect_language("write a golang http server"), "go");
        assert_eq!(detect_language("Laravel middleware for auth"), "php");
    }

    #[test]
    fn test_symbol_keywords() {
        assert_eq!(detect_language("implement a linked list in C++"), "cpp");
        assert_eq!(detect_language("LINQ query in C#"), "csharp");
        assert_eq!(detect_language("an ASP.NET controller"), "csharp");
        assert_eq!(detect_language("a .NET background worker"), "csharp");
    }

    #[test]
    fn test_dotted_words_match_their_parts() {
        assert_eq!(detect_language("stream a file with node.js"), "javascript");
    }

    #[test]
    fn test_keywords_do_not_match_inside_words() {
        assert_eq!(detect_language("search google for cargo ships"), "rust");
        assert_eq!(detect_language("merge two sorted lists"), DEFAULT_LANGUAGE);
        assert_eq!(detect_language("a javascript-free page"), "javascript");
    }

    #[test]
    fn test_earlier_language_wins_shared_keywords() {
        assert_eq!(detect_language("an Angular component"), "javascript");
    }

    #[test]
    fn test_defaults_to_python() {
        assert_eq!(detect_language("reverse a string"), "python");
        assert_eq!(detect_language(""), "python");
    }

    #[test]
    fn test_sentence_punctuation_is_ignored() {
        assert_eq!(detect_language("Do it in Ruby."), "ruby");
        assert_eq!(detect_language("Which is faster, Java?"), "java");
    }
}
