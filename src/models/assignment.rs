use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::rider::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Declined,
}

/// Binding between one delivery leg and (at most) one rider. Accepted and
/// Declined are terminal; a replacement is always a new row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub order_id: Uuid,
    /// None for bulk sub-orders that have not been paired with a rider yet.
    pub rider: Option<String>,
    pub status: AssignmentStatus,
    pub weight: f64,
    pub destination: Option<GeoPoint>,
    pub distance_meters: Option<f64>,
    pub duration_secs: Option<u64>,
    pub duration_text: Option<String>,
    pub price: Option<f64>,
    pub decline_reason: Option<String>,
    pub sequence: u32,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn is_live(&self) -> bool {
        matches!(self.status, AssignmentStatus::Pending | AssignmentStatus::Accepted)
    }
}

/// Audit row written whenever a rider turns down an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclinedOrder {
    pub id: Uuid,
    pub order_id: Uuid,
    pub rider: String,
    pub reason: String,
    pub declined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// Classification of a dispatch failure that needs manual follow-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EscalationKind {
    NoRidersAvailable,
    InsufficientCapacity,
    PartialAssignmentFailure,
    Other,
}

impl EscalationKind {
    pub fn priority(&self) -> TicketPriority {
        match self {
            EscalationKind::NoRidersAvailable => TicketPriority::Medium,
            EscalationKind::InsufficientCapacity => TicketPriority::High,
            EscalationKind::PartialAssignmentFailure => TicketPriority::Critical,
            EscalationKind::Other => TicketPriority::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationKind::NoRidersAvailable => "no_riders_available",
            EscalationKind::InsufficientCapacity => "insufficient_capacity",
            EscalationKind::PartialAssignmentFailure => "partial_assignment_failure",
            EscalationKind::Other => "unclassified",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportTicket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub ticket_type: String,
    pub priority: TicketPriority,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
