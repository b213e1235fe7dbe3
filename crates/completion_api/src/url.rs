/// Default base URL for the hosted backend that fronts the chat function.
pub const DEFAULT_CHAT_BASE_URL: &str = "http://127.0.0.1:54321";

const FUNCTIONS_PATH: &str = "/functions/v1";
const CHAT_FUNCTION: &str = "/chat";

/// Normalize a base URL to the chat completion function endpoint.
///
/// Normalization rules:
/// 1) keep `/functions/v1/chat` unchanged
/// 2) append `/chat` when path ends in `/functions/v1`
/// 3) append `/functions/v1/chat` otherwise
pub fn normalize_chat_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_CHAT_BASE_URL
    } else {
        input.trim()
    };

    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with("/functions/v1/chat") {
        return trimmed.to_string();
    }
    if trimmed.ends_with(FUNCTIONS_PATH) {
        return format!("{trimmed}{CHAT_FUNCTION}");
    }
    format!("{trimmed}{FUNCTIONS_PATH}{CHAT_FUNCTION}")
}
