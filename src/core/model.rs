// src/core/model.rs

//! Typed records for every synchronised entity in §3 of the data model.
//!
//! Each public-row struct mirrors a `public.<table>` relation exactly:
//! the identity UUID, `modified_date`, and every value column. History
//! rows reuse the same value columns plus a monotonically increasing
//! `history_id` (§3 invariant 2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `host_type` enumeration for the `hosts` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HostType {
    Node,
    Dashboard,
    Dr,
}

impl HostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostType::Node => "node",
            HostType::Dashboard => "dashboard",
            HostType::Dr => "dr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Host {
    pub host_uuid: Uuid,
    pub host_name: String,
    pub host_type: String,
    pub host_key: String,
    pub host_status: String,
    pub modified_date: DateTime<Utc>,
}

impl Host {
    /// Value columns compared by the Upserter (everything but the identity
    /// UUID and `modified_date`), per §4.D step 5.
    pub(crate) fn value_columns_equal(&self, other: &Host) -> bool {
        self.host_name == other.host_name
            && self.host_type == other.host_type
            && self.host_key == other.host_key
            && self.host_status == other.host_status
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub user_uuid: Uuid,
    pub user_name: String,
    pub user_password_hash: String,
    pub user_salt: String,
    pub user_algorithm: String,
    pub user_iteration_count: i32,
    pub user_language: String,
    pub user_is_admin: bool,
    pub user_is_experienced: bool,
    pub user_is_trusted: bool,
    pub modified_date: DateTime<Utc>,
}

impl User {
    pub(crate) fn value_columns_equal(&self, other: &User) -> bool {
        self.user_name == other.user_name
            && self.user_password_hash == other.user_password_hash
            && self.user_salt == other.user_salt
            && self.user_algorithm == other.user_algorithm
            && self.user_iteration_count == other.user_iteration_count
            && self.user_language == other.user_language
            && self.user_is_admin == other.user_is_admin
            && self.user_is_experienced == other.user_is_experienced
            && self.user_is_trusted == other.user_is_trusted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Variable {
    pub variable_uuid: Uuid,
    pub variable_name: String,
    pub variable_value: String,
    pub variable_default: String,
    pub variable_description: String,
    pub variable_section: String,
    pub variable_source_uuid: Option<Uuid>,
    pub variable_source_table: Option<String>,
    pub modified_date: DateTime<Utc>,
}

impl Variable {
    pub(crate) fn value_columns_equal(&self, other: &Variable) -> bool {
        self.variable_name == other.variable_name
            && self.variable_value == other.variable_value
            && self.variable_default == other.variable_default
            && self.variable_description == other.variable_description
            && self.variable_section == other.variable_section
            && self.variable_source_uuid == other.variable_source_uuid
            && self.variable_source_table == other.variable_source_table
    }
}

/// The fixed variable name the Lock Manager stores its token under (§4.H).
pub const LOCK_VARIABLE_NAME: &str = "lock_request";

/// The fixed variable name a peer advertises its Anvil build version under,
/// checked by the Connector before a pool is trusted (§4.A step 3).
pub const VERSION_VARIABLE_NAME: &str = "anvil_version";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Claimed,
    Running,
    Done,
}

impl JobState {
    /// Derives the logical state from `(progress, picked_up_by)`, per the
    /// state table in §4.I.
    pub fn from_progress(progress: i32, picked_up_by: i64) -> Self {
        match (progress, picked_up_by) {
            (100, _) => JobState::Done,
            (0, 0) => JobState::Pending,
            (1, pid) if pid != 0 => JobState::Claimed,
            (_, pid) if pid != 0 => JobState::Running,
            _ => JobState::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub job_uuid: Uuid,
    pub job_host_uuid: Uuid,
    pub job_command: String,
    pub job_data: String,
    pub job_picked_up_by: i64,
    pub job_picked_up_at: i64,
    pub job_updated: i64,
    pub job_name: String,
    pub job_progress: i32,
    pub job_title: String,
    pub job_description: String,
    pub job_status: String,
    pub modified_date: DateTime<Utc>,
}

impl Job {
    pub fn state(&self) -> JobState {
        JobState::from_progress(self.job_progress, self.job_picked_up_by)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    Critical,
    Warning,
    Notice,
    Debug,
    Info,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Critical => "critical",
            AlertLevel::Warning => "warning",
            AlertLevel::Notice => "notice",
            AlertLevel::Debug => "debug",
            AlertLevel::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Alert {
    pub alert_uuid: Uuid,
    pub alert_host_uuid: Uuid,
    pub alert_set_by: String,
    pub alert_level: String,
    pub alert_title_key: String,
    pub alert_title_vars: String,
    pub alert_message_key: String,
    pub alert_message_vars: String,
    pub alert_sort: i32,
    pub alert_header_flag: bool,
    pub modified_date: DateTime<Utc>,
}

impl Alert {
    pub(crate) fn value_columns_equal(&self, other: &Alert) -> bool {
        self.alert_host_uuid == other.alert_host_uuid
            && self.alert_set_by == other.alert_set_by
            && self.alert_level == other.alert_level
            && self.alert_title_key == other.alert_title_key
            && self.alert_title_vars == other.alert_title_vars
            && self.alert_message_key == other.alert_message_key
            && self.alert_message_vars == other.alert_message_vars
            && self.alert_sort == other.alert_sort
            && self.alert_header_flag == other.alert_header_flag
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NetworkInterface {
    pub network_interface_uuid: Uuid,
    pub network_interface_host_uuid: Uuid,
    pub network_interface_mac_address: String,
    pub network_interface_name: String,
    pub network_interface_bond_uuid: Option<Uuid>,
    pub network_interface_bridge_uuid: Option<Uuid>,
    pub modified_date: DateTime<Utc>,
}

impl NetworkInterface {
    pub(crate) fn value_columns_equal(&self, other: &NetworkInterface) -> bool {
        self.network_interface_host_uuid == other.network_interface_host_uuid
            && self.network_interface_mac_address == other.network_interface_mac_address
            && self.network_interface_name == other.network_interface_name
            && self.network_interface_bond_uuid == other.network_interface_bond_uuid
            && self.network_interface_bridge_uuid == other.network_interface_bridge_uuid
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bond {
    pub bond_uuid: Uuid,
    pub bond_host_uuid: Uuid,
    pub bond_name: String,
    pub bond_mode: String,
    pub modified_date: DateTime<Utc>,
}

impl Bond {
    pub(crate) fn value_columns_equal(&self, other: &Bond) -> bool {
        self.bond_host_uuid == other.bond_host_uuid
            && self.bond_name == other.bond_name
            && self.bond_mode == other.bond_mode
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bridge {
    pub bridge_uuid: Uuid,
    pub bridge_host_uuid: Uuid,
    pub bridge_name: String,
    pub modified_date: DateTime<Utc>,
}

impl Bridge {
    pub(crate) fn value_columns_equal(&self, other: &Bridge) -> bool {
        self.bridge_host_uuid == other.bridge_host_uuid && self.bridge_name == other.bridge_name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BridgeInterface {
    pub bridge_interface_uuid: Uuid,
    pub bridge_interface_bridge_uuid: Uuid,
    pub bridge_interface_network_interface_uuid: Uuid,
    pub modified_date: DateTime<Utc>,
}

impl BridgeInterface {
    pub(crate) fn value_columns_equal(&self, other: &BridgeInterface) -> bool {
        self.bridge_interface_bridge_uuid == other.bridge_interface_bridge_uuid
            && self.bridge_interface_network_interface_uuid
                == other.bridge_interface_network_interface_uuid
    }
}

/// The sentinel "deleted" address value for `ip_address` rows (§3, §9 Open
/// Questions — an overload on a value column, kept as-is per the spec).
pub const IP_ADDRESS_DELETED: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpOwnerType {
    Interface,
    Bond,
    Bridge,
}

impl IpOwnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpOwnerType::Interface => "interface",
            IpOwnerType::Bond => "bond",
            IpOwnerType::Bridge => "bridge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IpAddress {
    pub ip_address_uuid: Uuid,
    pub ip_address_address: String,
    pub ip_address_subnet_mask: String,
    pub ip_address_on_type: String,
    pub ip_address_on_uuid: Uuid,
    pub modified_date: DateTime<Utc>,
}

impl IpAddress {
    pub fn is_deleted(&self) -> bool {
        self.ip_address_address == IP_ADDRESS_DELETED
    }

    pub(crate) fn value_columns_equal(&self, other: &IpAddress) -> bool {
        self.ip_address_address == other.ip_address_address
            && self.ip_address_subnet_mask == other.ip_address_subnet_mask
            && self.ip_address_on_type == other.ip_address_on_type
            && self.ip_address_on_uuid == other.ip_address_on_uuid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    Iso,
    Rpm,
    Script,
    Image,
    Other,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Iso => "iso",
            FileType::Rpm => "rpm",
            FileType::Script => "script",
            FileType::Image => "image",
            FileType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AnvilFile {
    pub file_uuid: Uuid,
    pub file_name: String,
    pub file_directory: String,
    pub file_size: i64,
    pub file_md5sum: String,
    pub file_type: String,
    pub file_mtime: i64,
    pub modified_date: DateTime<Utc>,
}

impl AnvilFile {
    pub(crate) fn value_columns_equal(&self, other: &AnvilFile) -> bool {
        self.file_name == other.file_name
            && self.file_directory == other.file_directory
            && self.file_size == other.file_size
            && self.file_md5sum == other.file_md5sum
            && self.file_type == other.file_type
            && self.file_mtime == other.file_mtime
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileLocation {
    pub file_location_uuid: Uuid,
    pub file_location_host_uuid: Uuid,
    pub file_location_file_uuid: Uuid,
    pub file_location_active: bool,
    pub modified_date: DateTime<Utc>,
}

impl FileLocation {
    pub(crate) fn value_columns_equal(&self, other: &FileLocation) -> bool {
        self.file_location_host_uuid == other.file_location_host_uuid
            && self.file_location_file_uuid == other.file_location_file_uuid
            && self.file_location_active == other.file_location_active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Oui {
    pub oui_uuid: Uuid,
    pub oui_mac_prefix: String,
    pub oui_vendor: String,
    pub modified_date: DateTime<Utc>,
}

impl Oui {
    pub(crate) fn value_columns_equal(&self, other: &Oui) -> bool {
        self.oui_mac_prefix == other.oui_mac_prefix && self.oui_vendor == other.oui_vendor
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MacToIp {
    pub mac_to_ip_uuid: Uuid,
    pub mac_to_ip_mac_address: String,
    pub mac_to_ip_ip_address: String,
    pub modified_date: DateTime<Utc>,
}

impl MacToIp {
    pub(crate) fn value_columns_equal(&self, other: &MacToIp) -> bool {
        self.mac_to_ip_mac_address == other.mac_to_ip_mac_address
            && self.mac_to_ip_ip_address == other.mac_to_ip_ip_address
    }
}

/// State rows are ephemeral per-host tags, exempt from resync (§3, §4.E/F).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct State {
    pub state_uuid: Uuid,
    pub state_host_uuid: Uuid,
    pub state_name: String,
    pub state_note: String,
    pub modified_date: DateTime<Utc>,
}

impl State {
    pub(crate) fn value_columns_equal(&self, other: &State) -> bool {
        self.state_host_uuid == other.state_host_uuid
            && self.state_name == other.state_name
            && self.state_note == other.state_note
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub session_uuid: Uuid,
    pub session_host_uuid: Uuid,
    pub session_user_uuid: Uuid,
    pub session_salt: String,
    pub session_user_agent: String,
    pub modified_date: DateTime<Utc>,
}

impl Session {
    /// Clearing the salt logs the user out (§3).
    pub fn is_logged_out(&self) -> bool {
        self.session_salt.is_empty()
    }

    pub(crate) fn value_columns_equal(&self, other: &Session) -> bool {
        self.session_host_uuid == other.session_host_uuid
            && self.session_user_uuid == other.session_user_uuid
            && self.session_salt == other.session_salt
            && self.session_user_agent == other.session_user_agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_derivation_matches_table() {
        assert_eq!(JobState::from_progress(0, 0), JobState::Pending);
        assert_eq!(JobState::from_progress(1, 4242), JobState::Claimed);
        assert_eq!(JobState::from_progress(55, 4242), JobState::Running);
        assert_eq!(JobState::from_progress(100, 4242), JobState::Done);
    }

    #[test]
    fn ip_address_deleted_sentinel() {
        let ip = IpAddress {
            ip_address_uuid: Uuid::nil(),
            ip_address_address: "0".to_string(),
            ip_address_subnet_mask: "".to_string(),
            ip_address_on_type: "interface".to_string(),
            ip_address_on_uuid: Uuid::nil(),
            modified_date: Utc::now(),
        };
        assert!(ip.is_deleted());
    }

    #[test]
    fn session_logged_out_when_salt_cleared() {
        let session = Session {
            session_uuid: Uuid::nil(),
            session_host_uuid: Uuid::nil(),
            session_user_uuid: Uuid::nil(),
            session_salt: String::new(),
            session_user_agent: "test".to_string(),
            modified_date: Utc::now(),
        };
        assert!(session.is_logged_out());
    }
}
