/*!
Streaming xz compression by piping bytes through an external `xz` process.

[`XzWriter`] wraps any `std::io::Write` destination. Bytes written to it are
forwarded to the standard input of a spawned `xz` process and the compressed
stream it produces is copied into the destination as it arrives. Nothing is
buffered to completion, so memory use does not grow with the input.

The external tool must be available in `PATH` (see the
[XZ Utils home page](https://tukaani.org/xz/)), or its location must be given
to [`Builder::program`].

Every writer must be released with [`XzWriter::finish`], which closes the
pipe, waits for the process and hands the destination back. A writer that is
dropped without being finished panics and reports where it was created.

```no_run
use std::io::Write;

# fn main() -> Result<(), Box<dyn std::error::Error>> {
let mut wtr = xzpipe::XzWriter::new(Vec::new())?;
wtr.write_all(b"hello world")?;
let compressed: Vec<u8> = wtr.finish()?;
# Ok(()) }
```
*/

#![deny(missing_docs)]

pub use crate::cancel::CancelToken;
pub use crate::error::{Error, FinishError, Result};
pub use crate::guard::LeakPolicy;
pub use crate::write::{Builder, XzWriter};

/// The executable run when no other program is configured.
pub const XZ_PROGRAM: &str = "xz";

/// The arguments passed to the compressor: quiet, compress, write to stdout,
/// best compression, read from stdin.
const XZ_ARGS: [&str; 5] = ["--quiet", "--compress", "--stdout", "--best", "-"];

mod cancel;
mod error;
mod guard;
mod process;
mod write;
