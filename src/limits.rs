pub const MAX_STAY_NIGHTS: i64 = 365;
pub const MAX_GUESTS: u32 = 10_000;
pub const MAX_ROOMS_PER_REQUEST: u32 = 500;
pub const MAX_RESERVATIONS_PER_INVENTORY: usize = 100_000;
pub const MAX_MAINTENANCE_WINDOWS_PER_INVENTORY: usize = 1_000;
pub const MAX_RULES_PER_PROPERTY: usize = 10_000;
/// Room categories plus venues in one property.
pub const MAX_INVENTORIES_PER_PROPERTY: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 1024;
pub const MAX_LAYOUT_STYLE_LEN: usize = 64;
pub const MAX_PROPERTY_ID_LEN: usize = 128;
pub const MAX_PROPERTIES: usize = 1_000;
/// Longest accepted JSON request line on the wire, in bytes.
pub const MAX_LINE_LEN: usize = 256 * 1024;
