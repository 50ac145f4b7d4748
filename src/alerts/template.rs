use chrono::{DateTime, Utc};

use super::config::Alert;

/// Default milestone message (Telegram HTML)
pub const DEFAULT_TEMPLATE: &str = "🎉 <b>Milestone Achieved!</b>\n\n\
Your Instagram account <b>@{username}</b> has reached <b>{threshold}</b> followers!\n\n\
📊 Current count: <b>{count}</b> followers\n\
⏰ Achieved at: {fired_at}\n";

/// Fill an alert's template.
///
/// Placeholders: `{username}`, `{threshold}`, `{count}`, `{fired_at}`.
/// Unknown placeholders are left untouched.
pub fn render(alert: &Alert, count: u64, fired_at: DateTime<Utc>) -> String {
    alert
        .message_template
        .replace("{username}", alert.profile.as_str())
        .replace("{threshold}", &format_count(alert.threshold))
        .replace("{count}", &format_count(count))
        .replace("{fired_at}", &fired_at.format("%Y-%m-%d %H:%M UTC").to_string())
}

/// `1234567` -> `1,234,567`
pub fn format_count(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
