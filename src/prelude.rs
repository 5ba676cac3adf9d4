pub use log::{debug, error, info, warn};
pub use serde::{Deserialize, Serialize};
pub use std::convert::{TryFrom, TryInto};
pub use std::fmt::{self, Debug, Display, Formatter};
pub use std::str::FromStr;
