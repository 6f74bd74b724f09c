//! Text helpers shared by both relay directions: Telegram MarkdownV2
//! escaping and Discord mention normalization.

/// Characters Telegram's MarkdownV2 parser treats as markup.
pub const MARKDOWN_V2_RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

/// Backslash-escape every MarkdownV2 reserved character.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    for ch in text.chars() {
        if MARKDOWN_V2_RESERVED.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Strip Discord mention decoration: `<@123>`, `<@!123>` and `@123` become `123`.
pub fn normalize_mention(token: &str) -> &str {
    let token = token.trim();
    let inner = token
        .strip_prefix("<@")
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(token);
    let inner = inner.strip_prefix('!').unwrap_or(inner);
    inner.strip_prefix('@').unwrap_or(inner)
}

/// Render a user id as a Discord mention.
pub fn mention(id: &str) -> String {
    format!("<@{id}>")
}
