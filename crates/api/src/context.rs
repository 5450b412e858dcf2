use forgecrm_core::{EmailAddress, UserId};
use forgecrm_infra::jobs::Initiator;

/// The session a request runs in. Authentication happens upstream; the
/// fronting framework forwards who the user is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    user_id: UserId,
    email: Option<EmailAddress>,
    full_name: Option<String>,
}

impl SessionContext {
    pub fn new(user_id: UserId, email: Option<EmailAddress>, full_name: Option<String>) -> Self {
        Self {
            user_id,
            email,
            full_name,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn email(&self) -> Option<&EmailAddress> {
        self.email.as_ref()
    }

    pub fn initiator(&self) -> Initiator {
        let mut initiator = Initiator::new(self.user_id);
        if let Some(email) = &self.email {
            initiator = initiator.with_email(email.clone());
        }
        if let Some(name) = &self.full_name {
            initiator = initiator.with_full_name(name.clone());
        }
        initiator
    }
}
