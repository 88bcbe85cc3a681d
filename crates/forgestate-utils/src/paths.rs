//! Default path conventions for state and lock files.

use camino::{Utf8Path, Utf8PathBuf};

/// Default state path for a template: `<dir-of-template>/builder-state.json`.
pub fn default_state_path(template_path: &Utf8Path) -> Utf8PathBuf {
    let dir = template_path.parent().unwrap_or_else(|| Utf8Path::new("."));
    dir.join("builder-state.json")
}

/// Lock path for a given state path: `<state-path>.lock`.
pub fn lock_path_for(state_path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{state_path}.lock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_path_sits_beside_template() {
        let template = Utf8Path::new("/a/b/template.json");
        assert_eq!(
            default_state_path(template),
            Utf8PathBuf::from("/a/b/builder-state.json")
        );
    }

    #[test]
    fn lock_path_appends_suffix() {
        let state = Utf8Path::new("/a/b/builder-state.json");
        assert_eq!(
            lock_path_for(state),
            Utf8PathBuf::from("/a/b/builder-state.json.lock")
        );
    }
}
