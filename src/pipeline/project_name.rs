//! Project-name extraction from a pull request's changed files.
//!
//! Gallery pull requests add one source file under a known content root plus
//! assorted images, e.g.
//!
//! ```text
//! games/DoNotConsumeEmptyBowls.js
//! games/img/Do Not Consume Empty Bowls (1).png
//! games/img/DoNotConsumeEmptyBowls.png
//! ```
//!
//! The project name is the base name of the first path that sits under the
//! root and carries the expected suffix: `DoNotConsumeEmptyBowls`.

/// Content root of Sprig gallery submissions.
pub const SPRIG_GAMES_ROOT: &str = "games/";
/// Source suffix of a Sprig game.
pub const SPRIG_GAME_SUFFIX: &str = ".js";
/// Content root of OnBoard PCB projects.
pub const ONBOARD_PROJECTS_ROOT: &str = "projects/";

/// Base name, minus `suffix`, of the first path under `root` ending in `suffix`.
///
/// Returns `None` when no path matches; callers decide whether that is fatal.
pub fn extract_project_name<S: AsRef<str>>(paths: &[S], root: &str, suffix: &str) -> Option<String> {
    paths.iter().map(AsRef::as_ref).find_map(|path| {
        if !path.starts_with(root) || !path.ends_with(suffix) {
            return None;
        }
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let name = file_name.strip_suffix(suffix)?;
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    })
}

/// Name of the first directory directly under `root` touched by the change set.
///
/// `projects/Hackpad/gerber.zip` → `Hackpad`. Files sitting directly in
/// `root` do not name a project.
pub fn extract_project_dir<S: AsRef<str>>(paths: &[S], root: &str) -> Option<String> {
    paths.iter().map(AsRef::as_ref).find_map(|path| {
        let rest = path.strip_prefix(root)?;
        let (dir, remainder) = rest.split_once('/')?;
        if dir.is_empty() || remainder.is_empty() {
            None
        } else {
            Some(dir.to_string())
        }
    })
}
