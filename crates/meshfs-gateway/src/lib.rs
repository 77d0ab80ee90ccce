//! MeshFS gateways.
//!
//! Two halves of the file-sharing subsystem:
//!
//! - [`RemoteGateway`] serves this node's [`Share`]s to peers, filtering
//!   what each principal may see and delegating file I/O to one
//!   privilege-dropped subprocess per owning user where the platform
//!   allows it.
//! - [`LocalGateway`] aggregates peers' shares into one virtual tree and
//!   serves it to local WebDAV clients over connections handed in by the
//!   caller.
//!
//! The overlay network supplies identity: callers derive a
//! [`Permissions`] value per request and pass it to
//! [`RemoteGateway::handle`].

mod local;
mod permissions;
mod remote;
mod share;
mod user_server;

pub use local::{LocalGateway, LocalGatewayOptions};
pub use permissions::{
    is_write_method, permissions_for_principal, FullAccess, Permission, Permissions,
};
pub use remote::RemoteGateway;
pub use share::{platform_allows_share_as, Share};
pub use user_server::{Launcher, UserServer};
