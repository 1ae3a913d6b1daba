use anyhow::Result;

use crate::config::Config;
use crate::models::Vendor;

pub fn list_sources(config: &Config) -> Result<()> {
    println!("{:<14} {:<40} STATUS", "VENDOR", "ROOT");
    for vendor in Vendor::ALL {
        let (root, status) = match config.source(vendor) {
            Some(source) => {
                let status = if source.root.exists() {
                    "OK"
                } else {
                    "MISSING (root does not exist)"
                };
                (source.root.display().to_string(), status)
            }
            None => ("-".to_string(), "NOT CONFIGURED"),
        };
        println!("{:<14} {:<40} {}", vendor.as_str(), root, status);
    }
    Ok(())
}
