//! Reserved channel name prefixes (§3). Kept as plain functions rather
//! than a newtype — channels are transport-facing strings, and every
//! transport in §4.7 already matches on the raw name or its own
//! wildcard rule.

pub const AVAILABLE_DRIVERS: &str = "available-drivers";
pub const DRIVER_LOCATIONS: &str = "driver-locations";

pub fn ride_channel(ride_id: &str) -> String {
    format!("ride:{ride_id}")
}

pub fn driver_channel(driver_id: &str) -> String {
    format!("driver:{driver_id}")
}

pub fn h3_channel(cell: &str) -> String {
    format!("h3:{cell}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_use_reserved_prefixes() {
        assert_eq!(ride_channel("r1"), "ride:r1");
        assert_eq!(driver_channel("d1"), "driver:d1");
        assert_eq!(h3_channel("89283"), "h3:89283");
    }
}
