//! Subscription matching.

use crate::endpoint::{
    Endpoint, ANY_VALUE, CATEGORY_KEY, CLASSIFIER_KEY, DEFAULT_CATEGORY, ENABLED_KEY, GROUP_KEY,
    VERSION_KEY,
};

/// Decides whether a provider endpoint satisfies a subscription.
pub trait UrlMatcher: Send + Sync {
    fn is_match(&self, subscribe: &Endpoint, candidate: &Endpoint) -> bool;
}

/// Interface, category, enabled, group, version and classifier rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMatcher;

impl UrlMatcher for DefaultMatcher {
    fn is_match(&self, subscribe: &Endpoint, candidate: &Endpoint) -> bool {
        let wanted = subscribe.service_interface();
        if wanted != ANY_VALUE && wanted != candidate.service_interface() {
            return false;
        }

        let category = candidate.parameter_or(CATEGORY_KEY, DEFAULT_CATEGORY);
        let accepted = subscribe.parameter_or(CATEGORY_KEY, DEFAULT_CATEGORY);
        if !category_accepted(category, accepted) {
            return false;
        }

        if !candidate.bool_parameter(ENABLED_KEY, true)
            && subscribe.parameter(ENABLED_KEY) != Some(ANY_VALUE)
        {
            return false;
        }

        let group = subscribe.parameter(GROUP_KEY);
        let group_ok = match group {
            Some(ANY_VALUE) => true,
            Some(group) => list_contains(group, candidate.parameter(GROUP_KEY).unwrap_or("")),
            None => candidate.parameter(GROUP_KEY).is_none(),
        };
        if !group_ok {
            return false;
        }

        let version_ok = match subscribe.parameter(VERSION_KEY) {
            Some(ANY_VALUE) => true,
            version => version == candidate.parameter(VERSION_KEY),
        };
        if !version_ok {
            return false;
        }

        match subscribe.parameter(CLASSIFIER_KEY) {
            None | Some(ANY_VALUE) => true,
            classifier => classifier == candidate.parameter(CLASSIFIER_KEY),
        }
    }
}

fn category_accepted(category: &str, accepted: &str) -> bool {
    if accepted.is_empty() {
        return category == DEFAULT_CATEGORY;
    }
    let mut listed = false;
    for item in accepted.split(',').map(str::trim) {
        if item == ANY_VALUE {
            return true;
        }
        if item.strip_prefix('-') == Some(category) {
            return false;
        }
        if item == category {
            listed = true;
        }
    }
    listed
}

fn list_contains(list: &str, value: &str) -> bool {
    list == value || list.split(',').map(str::trim).any(|item| item == value)
}
