use crate::types::TopOfBook;
use chrono::{DateTime, Utc};

/// Validated top of book: both sides present, positive and uncrossed.
#[derive(Clone, Debug, PartialEq)]
pub struct MarketSnapshot {
    pub best_bid: f64,
    pub best_ask: f64,
    pub mid: f64,
    pub observed_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Builds a snapshot, or returns the reason the book cannot be quoted against.
    pub fn from_top_of_book(
        book: &TopOfBook,
        observed_at: DateTime<Utc>,
    ) -> Result<Self, &'static str> {
        let best_bid = book.best_bid.ok_or("missing_bid")?;
        let best_ask = book.best_ask.ok_or("missing_ask")?;
        if !(best_bid.is_finite() && best_ask.is_finite()) || best_bid <= 0.0 || best_ask <= 0.0 {
            return Err("non_positive_price");
        }
        if best_bid >= best_ask {
            return Err("crossed_book");
        }
        Ok(Self {
            best_bid,
            best_ask,
            mid: 0.5 * (best_bid + best_ask),
            observed_at,
        })
    }

    pub fn spread(&self) -> f64 {
        self.best_ask - self.best_bid
    }
}

/// Tracks the latest usable snapshot and how many books were unusable.
#[derive(Clone, Debug, Default)]
pub struct MarketDataState {
    last_snapshot: Option<MarketSnapshot>,
    rejected_books: u64,
}

impl MarketDataState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_top_of_book(
        &mut self,
        book: &TopOfBook,
        now: DateTime<Utc>,
    ) -> Result<MarketSnapshot, &'static str> {
        match MarketSnapshot::from_top_of_book(book, now) {
            Ok(snapshot) => {
                self.last_snapshot = Some(snapshot.clone());
                Ok(snapshot)
            }
            Err(reason) => {
                self.rejected_books += 1;
                Err(reason)
            }
        }
    }

    pub fn last_snapshot(&self) -> Option<&MarketSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn rejected_books(&self) -> u64 {
        self.rejected_books
    }
}
