pub mod exchange;
pub mod settings;

pub use exchange::{
    CapturedExchange, Completion, ExchangeStatus, RequestFailure, TabId, TransitionError,
    ANONYMOUS_OPERATION,
};
pub use settings::{Settings, Theme};
