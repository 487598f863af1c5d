//! Remote selection
//!
//! # Components
//!
//! - [`Endpoint`]: a single server with at most one reusable connection
//! - [`Group`]: a latency-ranked set of targets with failover
//! - [`Target`]: either of the above, behind the same two operations
//!
//! # Ranking
//!
//! Each group member carries a [`LatencyEstimate`] (an EWMA with smoothing
//! factor 0.5) and an error count. Measured members rank ahead of unmeasured
//! ones, lower latency ranks first, and the error count decides between
//! members whose estimates are identical. A failed dial or probe resets the
//! member's estimate and bumps its error count.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use keypool::{Client, ClientConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(Client::from_config(&ClientConfig::default())?);
//!
//! let primary = client.lookup_server("keys-east.example.com:2407").await?;
//! let backup = client.lookup_server("keys-west.example.com:2407").await?;
//! let remote = primary.combine(backup).await;
//!
//! let conn = remote.dial(&client).await?;
//! conn.probe().await?;
//! conn.release().await;
//! # Ok(())
//! # }
//! ```

pub mod endpoint;
pub mod group;
pub mod heap;
pub mod latency;

#[cfg(test)]
pub(crate) mod testing;

pub use endpoint::Endpoint;
pub use group::{Group, MemberStats, PROBE_DELAY};
pub use heap::IndexedHeap;
pub use latency::LatencyEstimate;

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

use crate::client::Client;
use crate::error::Result;
use crate::pool::Connection;

/// One or more remote servers that can be dialed as a unit
#[derive(Debug, Clone)]
pub enum Target {
    Endpoint(Arc<Endpoint>),
    Group(Arc<Group>),
}

impl Target {
    /// Obtain a live connection to this target
    pub fn dial<'a>(&'a self, client: &'a Arc<Client>) -> BoxFuture<'a, Result<Arc<dyn Connection>>> {
        match self {
            Target::Endpoint(endpoint) => endpoint.dial(client).boxed(),
            Target::Group(group) => group.dial(client).boxed(),
        }
    }

    /// Combine with `other`. An endpoint yields a new two-member group; a
    /// group takes `other` in as a member and returns itself.
    pub async fn combine(&self, other: Target) -> Target {
        match self {
            Target::Endpoint(endpoint) => endpoint.combine(other),
            Target::Group(group) => group.add(other).await,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Target::Endpoint(endpoint) => endpoint.label(),
            Target::Group(group) => group.label(),
        }
    }

    pub fn as_group(&self) -> Option<&Arc<Group>> {
        match self {
            Target::Group(group) => Some(group),
            Target::Endpoint(_) => None,
        }
    }

    /// True when both refer to the same endpoint or group
    pub fn same_as(&self, other: &Target) -> bool {
        match (self, other) {
            (Target::Endpoint(a), Target::Endpoint(b)) => Arc::ptr_eq(a, b),
            (Target::Group(a), Target::Group(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Endpoint> for Target {
    fn from(endpoint: Endpoint) -> Self {
        Target::Endpoint(Arc::new(endpoint))
    }
}

impl From<Group> for Target {
    fn from(group: Group) -> Self {
        Target::Group(Arc::new(group))
    }
}
