//! Deployment strategies and remote command composition.
//!
//! A repository's configuration selects exactly one [`DeployPolicy`]; the
//! builders here only compose command sequences — execution belongs to the
//! runner.  Every interpolated value (branch, commit message, path) goes
//! through [`sh_quote`] before it reaches a command string.

use serde::Deserialize;

use super::runner::sh_quote;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// How an uploaded dist payload lands in the repository working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployPolicy {
    /// Replace the dist directory from a staged copy; no VCS mutation.
    CopyOnly,
    /// Check out the branch, replace dist, commit, and push.
    CommitAndPush,
    /// Push the payload straight into the dist directory over the transfer
    /// session; no staged copy, no VCS mutation.
    Transfer,
}

impl DeployPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployPolicy::CopyOnly => "copy-only",
            DeployPolicy::CommitAndPush => "commit-and-push",
            DeployPolicy::Transfer => "transfer",
        }
    }
}

// ---------------------------------------------------------------------------
// Sequence builders
// ---------------------------------------------------------------------------

/// Commands that replace `dist_dir` with the contents of `source_dir` and
/// drop the staged copy.  Both paths are rooted at the working directory by
/// the runner's `cd` prefix or given absolute.
pub fn copy_only_sequence(source_dir: &str, dist_dir: &str) -> Vec<String> {
    let source = sh_quote(source_dir);
    let dist = sh_quote(dist_dir);
    vec![
        format!("rm -rf {dist}"),
        format!("mkdir -p {dist}"),
        format!("cp -a {source}/. {dist}/"),
        format!("rm -rf {source}"),
    ]
}

/// Commands that bring the branch up to date, replace `dist_dir` from
/// `source_dir`, and commit and push the result to the same branch on the
/// default remote.
pub fn commit_and_push_sequence(
    branch: &str,
    source_dir: &str,
    commit_message: &str,
    dist_dir: &str,
    sudo: bool,
) -> Vec<String> {
    let git = if sudo { "sudo git" } else { "git" };
    let branch = sh_quote(branch);
    let message = sh_quote(commit_message);
    let dist = sh_quote(dist_dir);

    let mut commands = vec![
        format!("{git} fetch"),
        format!("{git} checkout {branch}"),
        format!("{git} pull"),
    ];
    commands.extend(copy_only_sequence(source_dir, dist_dir));
    commands.push(format!("{git} add -A {dist}"));
    commands.push(format!("{git} commit -m {message}"));
    commands.push(format!("{git} push origin {branch}"));
    commands
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_only_replaces_dist_and_drops_the_stage() {
        let sequence = copy_only_sequence("/srv/web/.repodrive-stage", "dist");
        assert_eq!(
            sequence,
            vec![
                "rm -rf 'dist'",
                "mkdir -p 'dist'",
                "cp -a '/srv/web/.repodrive-stage'/. 'dist'/",
                "rm -rf '/srv/web/.repodrive-stage'",
            ]
        );
    }

    #[test]
    fn commit_and_push_orders_vcs_steps_around_the_replacement() {
        let sequence =
            commit_and_push_sequence("main", "stage", "release build", "dist", false);
        assert_eq!(sequence[0], "git fetch");
        assert_eq!(sequence[1], "git checkout 'main'");
        assert_eq!(sequence[2], "git pull");
        assert_eq!(sequence[3], "rm -rf 'dist'");
        assert_eq!(sequence[6], "rm -rf 'stage'");
        assert_eq!(sequence[7], "git add -A 'dist'");
        assert_eq!(sequence[8], "git commit -m 'release build'");
        assert_eq!(sequence[9], "git push origin 'main'");
    }

    #[test]
    fn branch_and_message_metacharacters_are_neutralised() {
        let sequence = commit_and_push_sequence(
            "fix; rm -rf /",
            "stage",
            "it's done && echo owned",
            "dist",
            false,
        );
        assert!(sequence.contains(&"git checkout 'fix; rm -rf /'".to_string()));
        assert!(sequence.contains(&"git commit -m 'it'\\''s done && echo owned'".to_string()));
    }

    #[test]
    fn sudo_prefixes_git_but_not_file_operations() {
        let sequence = commit_and_push_sequence("main", "stage", "msg", "dist", true);
        assert_eq!(sequence[0], "sudo git fetch");
        assert_eq!(sequence[3], "rm -rf 'dist'");
        assert_eq!(sequence[9], "sudo git push origin 'main'");
    }

    #[test]
    fn policy_labels_are_kebab_case() {
        assert_eq!(DeployPolicy::CopyOnly.as_str(), "copy-only");
        assert_eq!(DeployPolicy::CommitAndPush.as_str(), "commit-and-push");
        assert_eq!(DeployPolicy::Transfer.as_str(), "transfer");
    }
}
