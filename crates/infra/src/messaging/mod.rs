//! Message production and delivery for one recipient.

pub mod generator;
pub mod message;
pub mod sender;
pub mod shell;
pub mod template;
pub mod transport;

pub use generator::{GenerationError, GenerationFailure, MessageGenerator, Preview};
pub use message::Message;
pub use sender::{DeliveryError, DeliveryReceipt, DeliverySender};
pub use shell::EmailShell;
pub use template::{ContentSeed, EmailTemplate, TemplateCatalog, TemplateError};
pub use transport::{HttpMailTransport, InMemoryMailTransport, MailTransport, OutboundMail, TransportError};
