use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A caller-defined record mirrored into the log on every mutation.
///
/// The version written to the resource's own table always equals the log
/// revision assigned by the same transaction. `resource_key` identifies the
/// row across updates and deletes; it must be stable for the lifetime of
/// the resource.
pub trait VersionedResource:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    fn resource_version(&self) -> u64;
    fn set_resource_version(&mut self, version: u64);

    /// Stable primary key of this resource within its table.
    fn resource_key(&self) -> String;
}

/// Version metadata for embedding into resource structs.
///
/// Embed with `#[serde(flatten)]` and delegate the version accessors of
/// [`VersionedResource`] to it:
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use watchrelay_core::resource::{Meta, VersionedResource};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Task {
///     #[serde(flatten)]
///     meta: Meta,
///     uuid: String,
/// }
///
/// impl VersionedResource for Task {
///     fn resource_version(&self) -> u64 {
///         self.meta.resource_version
///     }
///     fn set_resource_version(&mut self, version: u64) {
///         self.meta.resource_version = version;
///     }
///     fn resource_key(&self) -> String {
///         self.uuid.clone()
///     }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub resource_version: u64,
}

/// Derive the log name for a resource type: the bare type name, snake-cased.
///
/// A boundary is inserted between a lowercase letter or digit and an
/// uppercase letter, then the whole name is lowercased. Consecutive
/// uppercase letters do not form a boundary: `HTTPRequest` becomes
/// `httprequest`.
pub fn resource_name_of<T>() -> String {
    let full = std::any::type_name::<T>();
    let bare = full.rsplit("::").next().unwrap_or(full);
    to_snake_case(bare)
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower_or_digit = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() && prev_lower_or_digit {
            out.push('_');
        }
        prev_lower_or_digit = c.is_ascii_lowercase() || c.is_ascii_digit();
        out.push(c.to_ascii_lowercase());
    }
    out
}
