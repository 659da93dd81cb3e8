//! Conduit Typed
//!
//! Compile-time registry of native methods. Each method is a marker type
//! carrying its wire name and its parameter and result types, so a call site
//! cannot pair a method with the wrong payload.
//!
//! ```ignore
//! bridge_methods! {
//!     /// Read a UTF-8 file from the app sandbox
//!     pub ReadFile = "fs.readFile": ReadFileParams => String;
//!     pub Ping = "app.ping": () => u64;
//! }
//!
//! let text = typed.call::<ReadFile>(ReadFileParams { path }).await?;
//! ```

mod bridge;

pub use bridge::TypedBridge;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A native method known at compile time.
pub trait Method {
    /// Wire name, e.g. `"fs.readFile"`.
    const NAME: &'static str;
    type Params: Serialize + Send;
    type Output: DeserializeOwned + Send;
}

/// Declare a closed set of [`Method`] marker types.
///
/// Each entry reads `vis Name = "wire.name": Params => Output;`.
#[macro_export]
macro_rules! bridge_methods {
    ($( $(#[$meta:meta])* $vis:vis $name:ident = $method:literal : $params:ty => $output:ty ;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, Default)]
            $vis struct $name;

            impl $crate::Method for $name {
                const NAME: &'static str = $method;
                type Params = $params;
                type Output = $output;
            }
        )*
    };
}
