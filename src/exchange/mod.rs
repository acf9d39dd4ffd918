mod connector;
mod paper;

pub use connector::ExchangeConnector;
pub use paper::{PaperCalls, PaperExchange, PaperOp};
