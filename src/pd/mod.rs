use std::net::Ipv6Addr;
use std::time::Duration;

pub mod client;
pub mod extensions;
pub mod infra;
pub mod prefix;
pub mod retx;
pub mod validate;

/// `All_DHCP_Relay_Agents_and_Servers` (ff02::1:2)
pub const ALL_DHCP_RELAY_AGENTS_AND_SERVERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 2);
pub const CLIENT_PORT: u16 = 546;
pub const SERVER_PORT: u16 = 547;

pub const DEFAULT_IAID: u32 = 0;
pub const DESIRED_PREFIX_LEN: u8 = 64;
pub const DEFAULT_PREFERENCE: u8 = 0;
pub const MAX_PREFERENCE: u8 = 255;

const MAX_DELAY_FIRST_SOLICIT: Duration = Duration::from_millis(1000);
const RETX_DELAY_ON_FAILED_TX: Duration = Duration::from_millis(1000);

const INITIAL_SOLICIT_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_SOLICIT_TIMEOUT: Duration = Duration::from_secs(3600);
const INITIAL_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REQUEST_RETX_COUNT: u16 = 10;
const INITIAL_RENEW_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RENEW_TIMEOUT: Duration = Duration::from_secs(600);
const INITIAL_REBIND_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REBIND_TIMEOUT: Duration = Duration::from_secs(600);
const INITIAL_RELEASE_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_RELEASE_RETX_COUNT: u16 = 4;

/// SOL_MAX_RT values outside this range (seconds) are ignored
const MIN_SOL_MAX_RT: u32 = 60;
const MAX_SOL_MAX_RT: u32 = 86400;

/// Lifetime clamping, all in seconds
pub const MAX_PREFERRED_LIFETIME: u32 = 4 * 3600;
pub const MAX_VALID_MARGIN_AFTER_PREFERRED: u32 = 120;
pub const MIN_PREFERRED_LIFETIME: u32 = 1800;
pub const MIN_T1: u32 = 300;
pub const MIN_T1_MARGIN_BEFORE_PREFERRED: u32 = 900;
pub const MIN_T2_MARGIN_BEFORE_PREFERRED: u32 = 360;
