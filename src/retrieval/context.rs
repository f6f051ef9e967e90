//! Conversation context for direct retrieval.
//!
//! Direct retrieval has no memory of its own, so prior turns are rendered into the query text.

use crate::clock;
use crate::history::{ChatMessage, Role};

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "ユーザー",
        Role::Assistant => "アシスタント",
    }
}

/// Render one history line as `[HH:MM:SS] label: content`.
pub fn render_line(message: &ChatMessage) -> String {
    let time = clock::clock_time(&message.timestamp).unwrap_or_default();
    format!("[{time}] {}: {}\n", role_label(message.role), message.content)
}

/// Render `history` (oldest first) within `max_chars`.
///
/// Lines are added in order until the next one would exceed the budget; that line and every
/// later one are dropped.
pub fn render_history(history: &[ChatMessage], max_chars: usize) -> String {
    let mut rendered = String::new();
    let mut used = 0;
    for message in history {
        let line = render_line(message);
        let length = line.chars().count();
        if used + length > max_chars {
            break;
        }
        used += length;
        rendered.push_str(&line);
    }
    rendered
}

/// Wrap the rendered history and the current question in the direct-mode prompt template.
pub fn build_query(history: &[ChatMessage], query: &str, max_chars: usize) -> String {
    let history_text = render_history(history, max_chars);
    format!(
        "<会話履歴>\n{history_text}</会話履歴>\n<質問>\nユーザー: {query}\n</質問>\n<出力形式>\n適切な改行を設けること\nプレーンテキストで出力すること。マークダウンなどで出力しないこと。\n</出力形式>"
    )
}
