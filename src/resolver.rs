//! Picks the instrument to bridge to by matching a free-text key against
//! the identity strings of every connected instrument.

use crate::visa::VisaResult;
use crate::Error;

/// Seam to the resource layer used during discovery. Implemented by
/// `visa::ResourceManager` against the real driver and by mocks in tests.
pub trait Discovery {
    /// Enumerate connected instrument resources, in driver order.
    fn enumerate(&self) -> VisaResult<Vec<String>>;

    /// Query the identification string of one resource through a
    /// transient session.
    fn identify(&self, descriptor: &str) -> VisaResult<String>;
}

/// Resolve `key` to the resource descriptor of the first enumerated
/// instrument whose identity string contains `key`, case-insensitively.
///
/// Enumeration failure is returned as-is. A candidate whose session
/// cannot be opened or queried is skipped so that one broken device does
/// not hide the others. If no candidate matches, including when nothing
/// is connected at all, the result is `Error::NotFound`.
pub fn resolve<D: Discovery>(layer: &D, key: &str) -> crate::Result<String> {
    let resources = layer.enumerate().map_err(Error::Visa)?;
    log::info!("discovered {} instrument resource(s)", resources.len());
    let needle = key.to_lowercase();
    for (idx, descriptor) in resources.iter().enumerate() {
        let identity = match layer.identify(descriptor) {
            Ok(identity) => identity,
            Err(err) => {
                log::warn!("skipping {}: identification failed: {}", descriptor, err);
                continue;
            }
        };
        log::info!("{}: {}, {}", idx + 1, descriptor, identity);
        if identity.to_lowercase().contains(&needle) {
            return Ok(descriptor.clone());
        }
    }
    Err(Error::NotFound {
        key: key.to_string(),
    })
}

/// Enumerate every instrument together with its identity string, pairing
/// `None` with resources that failed to identify. Backs the `--list`
/// mode.
pub fn list<D: Discovery>(layer: &D) -> crate::Result<Vec<(String, Option<String>)>> {
    let resources = layer.enumerate().map_err(Error::Visa)?;
    let mut out = Vec::with_capacity(resources.len());
    for descriptor in resources {
        let identity = match layer.identify(&descriptor) {
            Ok(identity) => Some(identity),
            Err(err) => {
                log::warn!("{}: identification failed: {}", descriptor, err);
                None
            }
        };
        out.push((descriptor, identity));
    }
    Ok(out)
}
