//! Token estimates and advisory cost.

/// Heuristic token count used before or instead of provider usage data.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as f64 / 4.0).round() as u32
}

/// Flat per-token rate for a model family. Matches on substrings of the selected model id.
pub fn cost_per_token(model: &str) -> f64 {
    let model = model.to_ascii_lowercase();
    if model.contains("gpt-4") {
        0.00003
    } else if model.contains("claude") {
        0.000015
    } else if model.contains("gemini") {
        0.00001
    } else {
        0.00002
    }
}

/// Advisory cost in USD for `total_tokens` on `model`.
pub fn estimate_cost(model: &str, total_tokens: u64) -> f64 {
    total_tokens as f64 * cost_per_token(model)
}
