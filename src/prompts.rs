//! Instruction templates sent to every backend.

use crate::transport::ChatMessage;

const CODE_ONLY_SYSTEM: &str = "IMPORTANT: Return ONLY the code. No explanations, no markdown formatting, no instructions. Just the raw code.";
const CODE_ONLY_USER: &str = "Return ONLY the code itself. No text before or after.";

/// Per-language persona for the system message.
pub fn system_prompt(language: &str) -> String {
    let known = match language.to_lowercase().as_str() {
        "python" => "You are an expert Python developer. Generate clean, efficient Python code following PEP 8 standards.",
        "javascript" => "You are an expert JavaScript developer. Generate modern ES6+ JavaScript code.",
        "typescript" => "You are an expert TypeScript developer. Generate type-safe TypeScript code.",
        "java" => "You are an expert Java developer. Generate clean, object-oriented Java code.",
        "cpp" => "You are an expert C++ developer. Generate modern C++17/20 code.",
        "rust" => "You are an expert Rust developer. Generate safe, idiomatic Rust code.",
        "go" => "You are an expert Go developer. Generate clean, idiomatic Go code.",
        "csharp" => "You are an expert C# developer. Generate clean, modern C# code.",
        _ => {
            return format!(
                "You are an expert {language} developer. Generate clean, well-documented code."
            );
        }
    };
    known.to_string()
}

/// Messages for a buffered generation: persona plus a code-only user request.
pub fn generation_messages(language: &str, prompt: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!("{}\n\n{CODE_ONLY_SYSTEM}", system_prompt(language))),
        ChatMessage::user(format!(
            "Generate {language} code for: {prompt}\n\n{CODE_ONLY_USER}"
        )),
    ]
}

/// Messages for a streamed generation. Streams carry the bare request only.
pub fn stream_messages(language: &str, prompt: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "Generate {language} code for: {prompt}"
    ))]
}
