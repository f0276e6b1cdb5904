//! Per-vendor command vocabulary. New switch families add a variant here;
//! nothing else in the engine changes.

use once_cell::sync::Lazy;

/// What the workers need to know about a switch family: how to export its
/// configuration over the shell and where its CPU load lives in the
/// management MIB.
pub trait VendorDialect: Send + Sync {
    fn tag(&self) -> &'static str;

    /// Command sequence that prints the full running configuration.
    fn capture_command(&self) -> &'static str;

    /// Issued before the capture to turn off interactive paging, if the
    /// family needs it.
    fn disable_paging_command(&self) -> Option<&'static str>;

    /// Vendor-specific CPU load object (integer percent).
    fn cpu_load_oid(&self) -> &'static [u64];

    /// Normalizes a raw capture: CRLF, backspace padding and pager
    /// artifacts removed, surrounding blank lines trimmed.
    fn clean_output(&self, raw: &str) -> String {
        let normalized = raw.replace("\r\n", "\n");
        let cleaned: Vec<&str> = normalized
            .lines()
            .filter(|line| !line.trim_start().starts_with("--More--"))
            .collect::<Vec<_>>()
            .iter()
            .map(|l| l.trim_end_matches('\r'))
            .collect();
        let text = cleaned.join("\n");
        let text = text.replace('\u{8}', "");
        text.trim_matches('\n').to_string()
    }
}

pub struct CiscoIos;

impl VendorDialect for CiscoIos {
    fn tag(&self) -> &'static str {
        "cisco-ios"
    }

    fn capture_command(&self) -> &'static str {
        "show running-config"
    }

    fn disable_paging_command(&self) -> Option<&'static str> {
        Some("terminal length 0")
    }

    // OLD-CISCO-CPU-MIB avgBusy5
    fn cpu_load_oid(&self) -> &'static [u64] {
        &[1, 3, 6, 1, 4, 1, 9, 2, 1, 57, 0]
    }
}

pub struct AristaEos;

impl VendorDialect for AristaEos {
    fn tag(&self) -> &'static str {
        "arista-eos"
    }

    fn capture_command(&self) -> &'static str {
        "show running-config"
    }

    fn disable_paging_command(&self) -> Option<&'static str> {
        Some("terminal length 0")
    }

    // HOST-RESOURCES-MIB hrProcessorLoad, first processor
    fn cpu_load_oid(&self) -> &'static [u64] {
        &[1, 3, 6, 1, 2, 1, 25, 3, 3, 1, 2, 1]
    }
}

pub struct Procurve;

impl VendorDialect for Procurve {
    fn tag(&self) -> &'static str {
        "procurve"
    }

    fn capture_command(&self) -> &'static str {
        "show running-config"
    }

    fn disable_paging_command(&self) -> Option<&'static str> {
        Some("no page")
    }

    // hpSwitchCpuStat
    fn cpu_load_oid(&self) -> &'static [u64] {
        &[1, 3, 6, 1, 4, 1, 11, 2, 14, 11, 5, 1, 9, 6, 1, 0]
    }
}

static REGISTRY: Lazy<Vec<&'static dyn VendorDialect>> =
    Lazy::new(|| vec![&CiscoIos, &AristaEos, &Procurve]);

/// Resolves a registry vendor tag. Unknown tags are rejected at device
/// registration, so worker-side resolution is infallible in practice.
pub fn dialect_for(tag: &str) -> Option<&'static dyn VendorDialect> {
    REGISTRY.iter().find(|d| d.tag() == tag).copied()
}

pub fn known_tags() -> Vec<&'static str> {
    REGISTRY.iter().map(|d| d.tag()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_tags_only() {
        for tag in known_tags() {
            let dialect = dialect_for(tag).expect("known tag resolves");
            assert_eq!(dialect.tag(), tag);
        }
        assert!(dialect_for("juniper-junos").is_none());
    }

    #[test]
    fn clean_output_strips_pager_and_line_endings() {
        let raw = "show running-config\r\n!\r\nhostname sw1\r\n --More-- \u{8}\u{8}\r\ninterface Vlan1\r\n\r\n";
        let cleaned = CiscoIos.clean_output(raw);
        assert!(!cleaned.contains("--More--"));
        assert!(!cleaned.contains('\r'));
        assert!(cleaned.starts_with("show running-config"));
        assert!(cleaned.ends_with("interface Vlan1"));
    }

    #[test]
    fn cpu_oids_are_vendor_specific() {
        assert_ne!(CiscoIos.cpu_load_oid(), Procurve.cpu_load_oid());
    }
}
