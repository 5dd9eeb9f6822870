//! Path policy table

use envoy_oidc_filter::config::Config;
use envoy_oidc_filter::oidc::{PathClass, PathMatcher};

use PathClass::{Exempt, Protected};

fn matcher(secure: &[&str], non_secure: &[&str]) -> PathMatcher {
    PathMatcher::new(secure, non_secure)
}

#[test]
fn policy_table() {
    let cases: &[(&[&str], &[&str], &str, PathClass)] = &[
        (&[], &[], "/anything", Protected),
        (&[], &["/health"], "/health", Exempt),
        (&[], &["/health"], "/api", Protected),
        (&["/admin"], &["/admin"], "/admin", Protected),
        (&["/admin"], &[], "/public", Exempt),
        (&["/admin"], &["/public"], "/admin", Protected),
        (&["/admin"], &["/public"], "/other", Exempt),
        (&[], &["/health"], "/health?check=1", Exempt),
        (&[], &["/health"], "/healthz", Protected),
        (&[" /admin "], &[], "/admin/users", Protected),
        (&[], &["/health"], "/health/../admin", Protected),
        (&[], &["/health"], "/health/%2e%2e/admin", Protected),
        (&[], &["/health"], "//health", Exempt),
        (&[], &["/"], "/%2e%2e/admin", Protected),
        (&["/admin"], &[], "/%61dmin", Protected),
        (&["/admin"], &[], "/./admin", Protected),
        (&["/admin"], &[], "//admin", Protected),
        (&["/admin"], &[], "/other/../admin", Protected),
        (&["/admin"], &[], "/admin%2fusers", Protected),
        (&["/admin"], &[], "admin", Protected),
    ];

    for (secure, non_secure, path, expected) in cases {
        let m = matcher(secure, non_secure);
        assert_eq!(
            m.classify(path),
            *expected,
            "secure={secure:?} non_secure={non_secure:?} path={path}"
        );
    }
}

#[test]
fn whitespace_only_entries_are_ignored() {
    let m = matcher(&["  ", ""], &[" "]);
    assert!(!m.is_allow_list());
    assert_eq!(m.classify("/"), Protected);
}

#[test]
fn matcher_follows_loaded_config() {
    let mut config = Config::default();
    config.paths.secure = vec!["/admin".to_string()];
    config.paths.non_secure = vec!["/admin".to_string()];

    let matcher = PathMatcher::from_config(&config.paths);
    assert!(matcher.is_allow_list());
    assert_eq!(matcher.classify("/admin/settings"), Protected);
    assert_eq!(matcher.classify("/"), Exempt);
}
