//! Property bag: the attribute → value map owned by an entity slot.

use hashbrown::HashMap;

use super::{AttrId, Value};

/// A map of attribute ids to values. Absence means "property not set",
/// which is distinct from a stored null.
pub type PropertyBag = HashMap<AttrId, Value>;
