//! Minimal layered configuration: CLI flags override environment-derived
//! defaults. There is no config file layer — unlike the richer
//! precedence chain a full CLI surface would have, this domain only
//! needs a state path and a lock identity.

#[derive(Debug, Clone)]
pub struct Config {
    pub who: String,
}

impl Config {
    /// Default identity used for lock ownership: `user@host`, falling
    /// back to `unknown` for either half that cannot be resolved from
    /// the environment.
    pub fn default_who() -> String {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let host = hostname();
        format!("{user}@{host}")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            who: Self::default_who(),
        }
    }
}

#[cfg(unix)]
fn hostname() -> String {
    let mut buf = [0u8; 256];
    unsafe {
        if libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) == 0 {
            let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            return String::from_utf8_lossy(&buf[..len]).to_string();
        }
    }
    "unknown".to_string()
}

#[cfg(not(unix))]
fn hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown".to_string())
}
