//! Built-in playback engines
//!
//! - [`native`]: decodes local files in-process and renders through CPAL
//! - [`mpv`]: drives an `mpv` process over its JSON IPC socket (Unix only)
//! - [`mpd`]: controls a Music Player Daemon over TCP
//!
//! [`builtin_backends`] returns the registry entries a factory starts with.

pub mod error;
pub mod mpd;
#[cfg(unix)]
pub mod mpv;
pub mod native;
mod ticker;

pub use error::EngineError;
pub use mpd::MpdBackend;
#[cfg(unix)]
pub use mpv::MpvBackend;
pub use native::NativeBackend;

use tonearm_core::BackendInfo;

/// Registry entries for every engine compiled for this platform
pub fn builtin_backends() -> Vec<BackendInfo> {
    let mut backends = vec![NativeBackend::backend_info()];
    #[cfg(unix)]
    backends.push(MpvBackend::backend_info());
    backends.push(MpdBackend::backend_info());
    backends
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_are_unique() {
        let backends = builtin_backends();
        let mut names: Vec<_> = backends.iter().map(|info| info.name.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), backends.len());
        assert!(backends.iter().all(|info| info.creator.is_some()));
    }

    #[cfg(unix)]
    #[test]
    fn unix_ships_all_three() {
        let names: Vec<_> = builtin_backends().into_iter().map(|info| info.name).collect();
        assert_eq!(names, vec!["native", "mpv", "mpd"]);
    }
}
