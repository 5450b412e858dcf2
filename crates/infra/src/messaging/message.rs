use forgecrm_core::RecipientId;

/// A fully formed message for one recipient.
///
/// Ephemeral: produced by the generator, consumed once by the sender, then
/// dropped. Only the recipient outcome is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub recipient_id: RecipientId,
    /// Delivery address. In test mode this is the initiating user's address.
    pub to: String,
    /// The lead's own address, whatever `to` is.
    pub actual_recipient: String,
    pub subject: String,
    /// HTML body.
    pub body: String,
    pub template_ref: String,
    pub ai_generated: bool,
}

impl Message {
    pub fn is_redirected(&self) -> bool {
        !self.to.eq_ignore_ascii_case(&self.actual_recipient)
    }
}
