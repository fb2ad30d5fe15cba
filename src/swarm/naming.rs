use chrono::{DateTime, Utc};

const MAX_SLUG_LEN: usize = 40;

/// Lowercase, dash-separated form of a task name safe for branch names.
///
/// # Examples
/// ```
/// use swarmflow::swarm::slugify;
/// assert_eq!(slugify("Add token expiry"), "add-token-expiry");
/// assert_eq!(slugify("  Fix: OAuth/SSO bug!! "), "fix-oauth-sso-bug");
/// assert_eq!(slugify("***"), "task");
/// ```
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    if slug.is_empty() {
        slug.push_str("task");
    }
    slug
}

fn stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S%3f").to_string()
}

/// `<prefix>/<slug>-<timestamp>`, unique to the millisecond.
pub fn staging_branch_name(prefix: &str, task_name: &str, now: DateTime<Utc>) -> String {
    let prefix = prefix.trim().trim_end_matches('/');
    format!("{}/{}-{}", prefix, slugify(task_name), stamp(now))
}

/// Branch for worker `index` (1-based).
pub fn worker_branch_name(staging_branch: &str, index: usize) -> String {
    format!("{}-worker-{}", staging_branch, index)
}

/// Temporary branch used while cherry-picking accepted work.
pub fn selective_branch_name(staging_branch: &str, now: DateTime<Utc>) -> String {
    format!("{}-selective-{}", staging_branch, stamp(now))
}

/// Directory name for a worktree of `branch`.
pub fn worktree_dir_name(branch: &str) -> String {
    branch.replace('/', "-")
}
