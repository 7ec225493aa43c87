//! Reminder text rendering.

use remindclaw_core::types::Contact;

/// Fill `{first_name}`, `{agent}`, `{day_label}` and `{link}` from a contact.
pub fn render(template: &str, contact: &Contact) -> String {
    template
        .replace("{first_name}", &contact.first_name)
        .replace("{agent}", &contact.agent_name)
        .replace("{day_label}", &contact.scheduled_day_label)
        .replace("{link}", &contact.monitoring_link)
}
