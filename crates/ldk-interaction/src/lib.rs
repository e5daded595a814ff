//! Interaction hub: action cards, the signed callback contract, and the
//! durable outbox dispatcher.

pub mod hub;
pub mod routes;
pub mod token;
pub mod worker;

pub use hub::{CallbackError, CreatedCard, HubOptions, InteractionHub};
pub use routes::{callback_router, ROLE_HEADER, SIGNATURE_HEADER};
pub use token::{mint_card_token, sign_callback, verify_callback, verify_card_token};
pub use worker::{DispatchOptions, InteractionWorker};
