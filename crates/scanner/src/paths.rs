use darkmap_core::ScanProfile;
use rand::Rng;

/// One probe target: the path and the category it flags when it hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePath {
    pub path: &'static str,
    pub category: &'static str,
}

const fn p(path: &'static str, category: &'static str) -> ProbePath {
    ProbePath { path, category }
}

/// The ten highest-yield probes.
const QUICK_PATHS: &[ProbePath] = &[
    p("/.env", "credentials-file"),
    p("/.git/HEAD", "source-control"),
    p("/.git/config", "source-control"),
    p("/.htpasswd", "credentials-file"),
    p("/robots.txt", "robots-sitemap"),
    p("/phpinfo.php", "server-info"),
    p("/server-status", "server-info"),
    p("/wp-config.php", "configuration-file"),
    p("/backup.sql", "backup-file"),
    p("/admin/", "admin-panel"),
];

/// Fifteen more for the standard profile.
const STANDARD_EXTRA_PATHS: &[ProbePath] = &[
    p("/phpmyadmin/", "admin-panel"),
    p("/adminer.php", "admin-panel"),
    p("/.svn/entries", "source-control"),
    p("/swagger.json", "server-info"),
    p("/.well-known/security.txt", "robots-sitemap"),
    p("/xmlrpc.php", "sensitive-directory"),
    p("/api-docs/", "server-info"),
    p("/config.php.bak", "configuration-file"),
    p("/dump.sql", "database-file"),
    p("/database.sqlite", "database-file"),
    p("/.htaccess", "configuration-file"),
    p("/error.log", "log-file"),
    p("/debug.log", "log-file"),
    p("/sitemap.xml", "robots-sitemap"),
    p("/backup.zip", "backup-file"),
];

/// Twenty-five extras for the full profile.
const FULL_EXTRA_PATHS: &[ProbePath] = &[
    p("/.git/index", "source-control"),
    p("/.gitignore", "source-control"),
    p("/.env.local", "credentials-file"),
    p("/.env.backup", "credentials-file"),
    p("/id_rsa", "credentials-file"),
    p("/.ssh/authorized_keys", "credentials-file"),
    p("/server-info", "server-info"),
    p("/info.php", "server-info"),
    p("/.DS_Store", "sensitive-directory"),
    p("/composer.json", "configuration-file"),
    p("/package.json", "configuration-file"),
    p("/config.json", "configuration-file"),
    p("/settings.py", "configuration-file"),
    p("/local_settings.py", "configuration-file"),
    p("/wp-login.php", "admin-panel"),
    p("/administrator/", "admin-panel"),
    p("/cpanel/", "admin-panel"),
    p("/webmail/", "admin-panel"),
    p("/login/", "admin-panel"),
    p("/panel/", "admin-panel"),
    p("/db.sql", "database-file"),
    p("/backup.tar.gz", "backup-file"),
    p("/site.bak", "backup-file"),
    p("/access.log", "log-file"),
    p("/old/", "sensitive-directory"),
];

/// Path list for a profile: quick ⊂ standard ⊂ full.
pub fn paths_for_profile(profile: ScanProfile) -> Vec<ProbePath> {
    let mut paths = QUICK_PATHS.to_vec();
    if profile == ScanProfile::Quick {
        return paths;
    }
    paths.extend_from_slice(STANDARD_EXTRA_PATHS);
    if profile == ScanProfile::Standard {
        return paths;
    }
    paths.extend_from_slice(FULL_EXTRA_PATHS);
    paths
}

/// A path that should not exist, used to capture the not-found baseline.
pub fn random_missing_path() -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let name: String = (0..24)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect();
    format!("/{}", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_profile_sizes() {
        assert_eq!(paths_for_profile(ScanProfile::Quick).len(), 10);
        assert_eq!(paths_for_profile(ScanProfile::Standard).len(), 25);
        assert_eq!(paths_for_profile(ScanProfile::Full).len(), 50);
    }

    #[test]
    fn test_full_contains_standard_and_no_duplicates() {
        let standard = paths_for_profile(ScanProfile::Standard);
        let full = paths_for_profile(ScanProfile::Full);
        for probe in &standard {
            assert!(full.contains(probe));
        }
        let unique: HashSet<&str> = full.iter().map(|p| p.path).collect();
        assert_eq!(unique.len(), full.len());
    }

    #[test]
    fn test_random_missing_path_shape() {
        let a = random_missing_path();
        let b = random_missing_path();
        assert_eq!(a.len(), 25);
        assert!(a.starts_with('/'));
        assert!(a[1..].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
