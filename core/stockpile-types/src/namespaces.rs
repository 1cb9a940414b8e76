//! Names of the persisted local namespaces.

/// Ordered log of writes awaiting remote confirmation.
pub const PENDING_OPERATIONS: &str = "pending_operations";
/// Durable mirror of high/critical cache entries.
pub const CRITICAL_DATA: &str = "critical_data";

pub const RESOURCES: &str = "resources";
pub const TRANSACTIONS: &str = "transactions";
pub const MULTI_TRANSACTIONS: &str = "multi_transactions";
pub const HISTORY: &str = "history";
pub const BORROWERS: &str = "borrowers";
pub const USER_DATA: &str = "user_data";

/// Namespaces that hold cached domain collections.
pub const DOMAIN_COLLECTIONS: [&str; 6] = [
    RESOURCES,
    TRANSACTIONS,
    MULTI_TRANSACTIONS,
    HISTORY,
    BORROWERS,
    USER_DATA,
];

/// Returns true for the namespaces reserved by the engine itself.
#[must_use]
pub fn is_reserved(namespace: &str) -> bool {
    namespace == PENDING_OPERATIONS || namespace == CRITICAL_DATA
}
