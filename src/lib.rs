pub mod config;
pub mod duid;
pub mod error;
pub mod logging;
pub mod pd;
pub mod transport;

pub use duid::Duid;
pub use error::Error;
pub use pd::{
    client::{Dhcp6PdClient, State},
    infra::{Clock, InfraIf, SystemClock},
    prefix::{DelegatedPrefix, PrefixSelector, SmallestAdjustedPrefix},
};
