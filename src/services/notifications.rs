//! Outbound guide notifications
//!
//! Core operations never wait on delivery. They push a [`NotificationRequest`]
//! onto the outbox and move on; a dispatcher task drains the queue and hands
//! each request to the configured [`Notifier`]. Delivery failures are logged
//! and dropped.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::DispatchError;

/// Message asking a guide to confirm an assignment
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NotificationRequest {
    pub phone: String,
    pub trip_code: String,
    pub trip_date: NaiveDate,
    pub guide_id: String,
    pub assignment_id: String,
}

/// Delivery collaborator (WhatsApp gateway, SMS, ...)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, request: &NotificationRequest) -> Result<(), DispatchError>;
}

/// Notifier that only logs; used when no transport is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, request: &NotificationRequest) -> Result<(), DispatchError> {
        info!(
            phone = %request.phone,
            trip_code = %request.trip_code,
            trip_date = %request.trip_date,
            "Assignment notification"
        );
        Ok(())
    }
}

/// Sending half of the notification queue
#[derive(Clone)]
pub struct NotificationOutbox {
    sender: mpsc::UnboundedSender<NotificationRequest>,
}

impl NotificationOutbox {
    /// Create an outbox and the receiver the dispatcher drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NotificationRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queue a notification. Never fails the caller.
    pub fn enqueue(&self, request: NotificationRequest) {
        let assignment_id = request.assignment_id.clone();
        if let Err(e) = self.sender.send(request) {
            warn!(
                assignment_id = %assignment_id,
                error = %e,
                "Notification dispatcher is gone; dropping notification"
            );
        }
    }
}

/// Spawn the task that delivers queued notifications
pub fn spawn_dispatcher(
    mut receiver: mpsc::UnboundedReceiver<NotificationRequest>,
    notifier: Arc<dyn Notifier>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = receiver.recv().await {
            match notifier.notify(&request).await {
                Ok(()) => {
                    debug!(assignment_id = %request.assignment_id, "Notification delivered");
                }
                Err(e) => {
                    warn!(
                        assignment_id = %request.assignment_id,
                        guide_id = %request.guide_id,
                        error = %e,
                        "Notification failed"
                    );
                }
            }
        }
        debug!("Notification outbox closed, stopping dispatcher");
    })
}
