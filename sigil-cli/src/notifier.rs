//! Terminal notifications.

use console::{style, Term};
use sigil::notify::{Notification, Notifier, Placement, Severity};
use tracing::debug;

/// Prints notifications to stdout, coloured by severity.
#[derive(Debug, Clone)]
pub struct ConsoleNotifier {
    term: Term,
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self {
            term: Term::stdout(),
        }
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: Notification) {
        let text = render(&notification);
        if let Err(e) = self.term.write_line(&text) {
            debug!(error = %e, "Failed to write notification to terminal");
        }
    }
}

fn render(notification: &Notification) -> String {
    let title = match notification.severity {
        Severity::Info => style(&notification.title).cyan().bold(),
        Severity::Success => style(&notification.title).green().bold(),
        Severity::Error => style(&notification.title).red().bold(),
    };
    let marker = match notification.placement {
        Placement::BottomLeft => "◂",
        Placement::BottomRight => "▸",
    };

    let mut text = format!("{} {}", marker, title);
    for line in &notification.lines {
        text.push_str(&format!("\n    {}", line));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_lines_under_title() {
        console::set_colors_enabled(false);
        let text = render(&Notification::recommendation_error());
        assert_eq!(
            text,
            "▸ Error\n    Error fetching recommendation. Please try again later."
        );
    }

    #[test]
    fn test_notify_never_panics() {
        ConsoleNotifier::default().notify(Notification::recommendation_error());
    }
}
