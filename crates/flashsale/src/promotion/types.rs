use crate::PromotionId;

/// A limited-stock promotion as configured by the operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Promotion {
    pub id: PromotionId,
    /// Units available for the whole promotion.
    pub stock: u64,
    /// Opening instant, milliseconds since the Unix epoch.
    pub begin_ms: u64,
    /// Closing instant, milliseconds since the Unix epoch.
    pub end_ms: u64,
}

impl Promotion {
    pub const fn window(&self) -> PromotionWindow {
        PromotionWindow {
            begin_ms: self.begin_ms,
            end_ms: self.end_ms,
        }
    }
}

/// The admission window of a promotion. Both bounds are inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PromotionWindow {
    pub begin_ms: u64,
    pub end_ms: u64,
}

/// Where an instant falls relative to a [`PromotionWindow`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowStatus {
    NotStarted,
    Open,
    Ended,
}

impl PromotionWindow {
    pub const fn status_at(&self, now_ms: u64) -> WindowStatus {
        if now_ms < self.begin_ms {
            WindowStatus::NotStarted
        } else if now_ms > self.end_ms {
            WindowStatus::Ended
        } else {
            WindowStatus::Open
        }
    }
}
