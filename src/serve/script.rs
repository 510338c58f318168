//! Executable page support.
//!
//! A page whose first line starts with `#!` and whose execute bit is set is
//! run instead of read. The child gets a freshly built environment:
//!
//! | Variable          | Source                                       |
//! |-------------------|----------------------------------------------|
//! | `PATH`            | the node's own `PATH`, if set                |
//! | `link_id`         | hex link id, if the request came over a link |
//! | `remote_identity` | hex identity hash of an identified caller    |
//! | `field_*`/`var_*` | matching keys of a mapping payload, verbatim |
//!
//! Nothing else from the host environment or the payload is forwarded.
//! Only stdout is captured. Any failure falls back to the raw file bytes.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use crate::core::RequestContext;
use crate::error;
use crate::utils::exec::{Cmd, ExecError};

/// Interpreter marker at the start of a script page.
const SHEBANG: [u8; 2] = *b"#!";

/// Payload key prefixes forwarded into the script environment.
pub const FORWARDED_PREFIXES: &[&str] = &["field_", "var_"];

/// Default bound on script runtime.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs executable pages with a restricted environment.
#[derive(Debug, Clone)]
pub struct ScriptSandbox {
    timeout: Option<Duration>,
}

impl Default for ScriptSandbox {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

impl ScriptSandbox {
    /// `None` lets scripts run unbounded.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Output of the script at `path`, or `None` when the page should be
    /// served as static bytes (not a script, or the script failed).
    pub fn maybe_execute(&self, path: &Path, ctx: &RequestContext) -> Option<Vec<u8>> {
        if !is_script(path) {
            return None;
        }

        match self.execute(path, ctx) {
            Ok(output) => Some(output),
            Err(e) => {
                error!("script"; "{} (request {}, peer {}): {}", path.display(), ctx.path, ctx.peer(), e);
                None
            }
        }
    }

    fn execute(&self, path: &Path, ctx: &RequestContext) -> Result<Vec<u8>, ExecError> {
        let cwd = path.parent().unwrap_or(path);
        Cmd::new(path)
            .cwd(cwd)
            .env_clear()
            .envs(build_env(ctx))
            .timeout(self.timeout)
            .run()
    }
}

/// Check if `path` is an executable script page.
pub fn is_script(path: &Path) -> bool {
    has_shebang(path) && is_executable(path)
}

fn has_shebang(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut marker = [0u8; 2];
    file.read_exact(&mut marker).is_ok() && marker == SHEBANG
}

/// Executable by this process, checked with `access(2)` so the owner,
/// group and other bits apply as they would for an `exec`.
#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    path.is_file() && unsafe { libc::access(c_path.as_ptr(), libc::X_OK) } == 0
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

/// Build the script environment from scratch for one request.
pub fn build_env(ctx: &RequestContext) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();

    if let Ok(path) = std::env::var("PATH") {
        env.insert("PATH".to_owned(), path);
    }
    if let Some(link_id) = &ctx.link_id {
        env.insert("link_id".to_owned(), hex::encode(link_id));
    }
    if let Some(identity) = &ctx.remote_identity {
        env.insert("remote_identity".to_owned(), hex::encode(identity));
    }

    if let Some(map) = ctx.payload.as_map() {
        for (key, value) in map {
            if is_forwarded_key(key) && is_env_safe(key, value) {
                env.insert(key.clone(), value.clone());
            }
        }
    }

    env
}

fn is_forwarded_key(key: &str) -> bool {
    FORWARDED_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// `Command` cannot carry NUL bytes, and `=` in a key would split it.
fn is_env_safe(key: &str, value: &str) -> bool {
    !key.contains(['=', '\0']) && !value.contains('\0')
}
