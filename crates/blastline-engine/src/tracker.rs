//! Delivery tracker — folds provider receipts into task and campaign state.
//!
//! Receipts arrive out of order, duplicated, and sometimes for messages we
//! never sent. Every application is a conditional transition in the store,
//! so replaying a webhook is always safe: the first copy moves counters,
//! every later copy reports `Duplicate` and changes nothing.

use std::sync::Arc;

use blastline_channels::receipt::Receipt;
use blastline_core::error::Result;
use blastline_core::types::ReceiptEvent;
use blastline_store::{CampaignDb, ReceiptApply};
use tokio::sync::mpsc;

/// Buffered receipts between webhook intake and the consumer loop.
const INBOX_CAPACITY: usize = 1024;

pub struct DeliveryTracker {
    db: Arc<CampaignDb>,
}

impl DeliveryTracker {
    pub fn new(db: Arc<CampaignDb>) -> Self {
        Self { db }
    }

    /// Apply one receipt. Returns what the store did with it.
    pub fn on_receipt(&self, receipt: &Receipt) -> Result<ReceiptApply> {
        let applied = match receipt.event {
            ReceiptEvent::Delivered => self.db.apply_delivered(&receipt.provider_message_id)?,
            ReceiptEvent::Read => self.db.apply_read(&receipt.provider_message_id)?,
            ReceiptEvent::Failed => self.db.apply_failed_receipt(&receipt.provider_message_id)?,
        };
        match applied {
            ReceiptApply::Applied => {
                tracing::debug!(
                    "📬 Receipt {:?} applied to {}",
                    receipt.event,
                    receipt.provider_message_id
                );
            }
            ReceiptApply::Duplicate => {
                tracing::debug!(
                    "Duplicate receipt {:?} for {} ignored",
                    receipt.event,
                    receipt.provider_message_id
                );
            }
            ReceiptApply::Unknown => {
                tracing::warn!(
                    "⚠️ Receipt for unknown provider message id {}",
                    receipt.provider_message_id
                );
            }
        }
        Ok(applied)
    }
}

/// Create the receipt inbox and spawn its consumer loop.
///
/// Webhook handlers push into the returned sender; the loop applies each
/// receipt in arrival order. Store errors are logged, never fatal — one bad
/// receipt must not take the tracker down.
pub fn receipt_inbox(tracker: Arc<DeliveryTracker>) -> mpsc::Sender<Receipt> {
    let (tx, mut rx) = mpsc::channel::<Receipt>(INBOX_CAPACITY);
    tokio::spawn(async move {
        tracing::info!("📬 Delivery tracker inbox started");
        while let Some(receipt) = rx.recv().await {
            if let Err(e) = tracker.on_receipt(&receipt) {
                tracing::error!(
                    "⚠️ Failed to apply receipt for {}: {e}",
                    receipt.provider_message_id
                );
            }
        }
        tracing::info!("📬 Delivery tracker inbox closed");
    });
    tx
}
