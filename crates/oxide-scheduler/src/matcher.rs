//! Capability matching between stage requirements and runner profiles.

use oxide_core::filter::{CapabilityProfile, Filter};

/// Matcher for pairing stages with runners.
///
/// An empty stage field is a wildcard. Every other stage field must equal the
/// runner's field exactly, so a runner that leaves a field blank cannot take
/// a stage that names it. A runner filter with every field empty accepts any
/// stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterMatcher;

impl FilterMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Check if a runner profile satisfies a stage filter.
    pub fn matches(&self, stage: &Filter, runner: &CapabilityProfile) -> bool {
        self.mismatches(stage, runner).is_empty()
    }

    /// Names of the fields that rule the runner out.
    pub fn mismatches(&self, stage: &Filter, runner: &CapabilityProfile) -> Vec<&'static str> {
        if runner.is_empty() {
            return Vec::new();
        }
        stage
            .fields()
            .into_iter()
            .zip(runner.fields())
            .filter(|((_, want), (_, have))| !want.is_empty() && want != have)
            .map(|((name, _), _)| name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux() -> Filter {
        Filter::any().with_os("linux").with_arch("amd64")
    }

    #[test]
    fn test_empty_stage_filter_matches_everything() {
        let matcher = FilterMatcher::new();
        assert!(matcher.matches(&Filter::any(), &linux()));
        assert!(matcher.matches(&Filter::any(), &Filter::any().with_os("windows")));
    }

    #[test]
    fn test_empty_request_filter_matches_everything() {
        let matcher = FilterMatcher::new();
        assert!(matcher.matches(&linux(), &Filter::any()));
    }

    #[test]
    fn test_partial_profile_does_not_cover_named_fields() {
        let matcher = FilterMatcher::new();
        let runner = Filter::any().with_os("linux");
        let arm = Filter::any().with_os("linux").with_arch("arm64");

        assert!(!matcher.matches(&arm, &runner));
        assert_eq!(matcher.mismatches(&arm, &runner), vec!["arch"]);
        assert!(matcher.matches(&Filter::any().with_os("linux"), &runner));
        assert!(matcher.matches(&Filter::any(), &runner));
    }

    #[test]
    fn test_exact_and_case_sensitive() {
        let matcher = FilterMatcher::new();
        let runner = linux();

        assert!(matcher.matches(&Filter::any().with_os("linux"), &runner));
        assert!(!matcher.matches(&Filter::any().with_os("Linux"), &runner));
        assert!(!matcher.matches(&Filter::any().with_os("windows"), &runner));
    }

    #[test]
    fn test_every_field_participates() {
        let matcher = FilterMatcher::new();
        let runner = Filter::any()
            .with_kind("pipeline")
            .with_type("docker")
            .with_os("linux")
            .with_arch("arm64")
            .with_kernel("6.1");

        let stage = Filter::any()
            .with_kind("pipeline")
            .with_type("exec")
            .with_os("linux")
            .with_arch("amd64")
            .with_kernel("6.1");

        assert_eq!(matcher.mismatches(&stage, &runner), vec!["type", "arch"]);
        assert!(!matcher.matches(&stage, &runner));
    }

    #[test]
    fn test_idempotent() {
        let matcher = FilterMatcher::new();
        let stage = Filter::any().with_os("linux");
        let runner = linux();
        let first = matcher.matches(&stage, &runner);
        assert_eq!(first, matcher.matches(&stage, &runner));
    }
}
