//! Inventory filters
//!
//! The inactivity bound is sent to OCM as a `search` pre-filter and enforced
//! again client-side. Everything else is applied in memory once all pages are
//! in.

use chrono::{DateTime, Duration, NaiveTime, Utc};

use super::subscription::Subscription;
use crate::crd::{DiscoveredClusterSpec, Filter};

/// Statuses that never produce a DiscoveredCluster
const EXCLUDED_STATUSES: &[&str] = &["Archived", "Deprovisioned", "Reserved"];

/// Earliest update time a record may have: midnight UTC of the day `days`
/// before `now` (floored at zero days)
///
/// The server pre-filter and the client post-filter share this cutoff, so a
/// record the server returns is never dropped by the client or vice versa.
pub fn last_active_cutoff(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    (now - Duration::days(days.max(0)))
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc()
}

/// `search` query term for the inventory listing, if the filter bounds activity
pub fn search_term(filter: &Filter, now: DateTime<Utc>) -> Option<String> {
    (filter.last_active > 0).then(|| {
        format!(
            "updated_at >= '{}'",
            last_active_cutoff(now, filter.last_active).format("%Y-%m-%dT%H:%M:%S")
        )
    })
}

/// Drop subscriptions that must never be mirrored or fall outside the filter
pub fn post_filter(
    subscriptions: Vec<Subscription>,
    filter: &Filter,
    now: DateTime<Utc>,
) -> Vec<Subscription> {
    let cutoff = (filter.last_active > 0).then(|| last_active_cutoff(now, filter.last_active));

    subscriptions
        .into_iter()
        .filter(|s| !EXCLUDED_STATUSES.contains(&s.status.as_str()))
        .filter(|s| !s.external_cluster_id.is_empty())
        .filter(|s| matches_version(s, &filter.open_shift_versions))
        .filter(|s| cutoff.is_none_or(|c| active_since(s, c)))
        .collect()
}

/// Whether a translated record passes the type, provider and region allow-lists
pub fn matches_allow_lists(spec: &DiscoveredClusterSpec, filter: &Filter) -> bool {
    allowed(&filter.cluster_types, &spec.type_)
        && allowed(&filter.infrastructure_providers, &spec.cloud_provider)
        && allowed(&filter.regions, &spec.region)
}

fn allowed(list: &[String], value: &str) -> bool {
    list.is_empty() || list.iter().any(|v| v.eq_ignore_ascii_case(value))
}

/// Versions match on whole components, so `4.1` does not admit `4.10.3`
fn matches_version(subscription: &Subscription, versions: &[String]) -> bool {
    if versions.is_empty() {
        return true;
    }
    let Some(reported) = subscription.metrics.first().map(|m| m.openshift_version.as_str()) else {
        return false;
    };
    versions.iter().any(|v| {
        reported
            .strip_prefix(v.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    })
}

/// Inclusive: an update at any time on the cutoff date is kept
fn active_since(subscription: &Subscription, cutoff: DateTime<Utc>) -> bool {
    subscription.updated_at.is_some_and(|updated| updated >= cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocm::subscription::SubscriptionMetrics;
    use chrono::TimeZone;
    use rstest::rstest;

    fn sub(id: &str, status: &str, version: &str) -> Subscription {
        Subscription {
            external_cluster_id: id.to_string(),
            status: status.to_string(),
            metrics: vec![SubscriptionMetrics {
                openshift_version: version.to_string(),
            }],
            updated_at: Some(Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        at(2020, 6, 5, 12)
    }

    #[test]
    fn cutoff_is_floored_at_zero_days() {
        assert_eq!(last_active_cutoff(now(), -3), at(2020, 6, 5, 0));
        assert_eq!(last_active_cutoff(now(), 7), at(2020, 5, 29, 0));
    }

    #[test]
    fn search_term_only_when_bounded() {
        assert_eq!(search_term(&Filter::default(), now()), None);

        let filter = Filter {
            last_active: 7,
            ..Default::default()
        };
        assert_eq!(
            search_term(&filter, now()).as_deref(),
            Some("updated_at >= '2020-05-29T00:00:00'")
        );
    }

    /// Story: Server and client agree on the inactivity boundary
    ///
    /// A record updated early on the cutoff date satisfies the search term
    /// the server evaluates and survives the client post-filter.
    #[test]
    fn story_search_term_and_post_filter_share_cutoff() {
        let filter = Filter {
            last_active: 7,
            ..Default::default()
        };
        let updated = at(2020, 5, 29, 1);
        let cutoff = last_active_cutoff(now(), filter.last_active);

        let term = search_term(&filter, now()).unwrap();
        assert!(term.ends_with(&format!("'{}'", cutoff.format("%Y-%m-%dT%H:%M:%S"))));
        assert!(updated >= cutoff, "server would return the record");

        let mut s = sub("c1", "Active", "4.9.0");
        s.updated_at = Some(updated);
        assert_eq!(post_filter(vec![s], &filter, now()).len(), 1);
    }

    /// Story: The inactivity boundary is inclusive
    ///
    /// With a cutoff on 2020-05-29, a cluster last updated that day is kept
    /// and one updated the day before is dropped.
    #[rstest]
    #[case(at(2020, 5, 29, 0), true)]
    #[case(at(2020, 5, 29, 23), true)]
    #[case(at(2020, 5, 28, 23), false)]
    #[case(at(2020, 5, 30, 1), true)]
    fn story_last_active_boundary(#[case] updated: DateTime<Utc>, #[case] kept: bool) {
        let filter = Filter {
            last_active: 7,
            ..Default::default()
        };
        let mut s = sub("c1", "Active", "4.9.0");
        s.updated_at = Some(updated);

        assert_eq!(post_filter(vec![s], &filter, now()).len() == 1, kept);
    }

    #[test]
    fn missing_update_time_is_dropped_only_when_bounded() {
        let mut s = sub("c1", "Active", "4.9.0");
        s.updated_at = None;

        assert_eq!(post_filter(vec![s.clone()], &Filter::default(), now()).len(), 1);

        let bounded = Filter {
            last_active: 1,
            ..Default::default()
        };
        assert!(post_filter(vec![s], &bounded, now()).is_empty());
    }

    #[rstest]
    #[case("Archived", false)]
    #[case("Deprovisioned", false)]
    #[case("Reserved", false)]
    #[case("Active", true)]
    #[case("Disconnected", true)]
    #[case("Stale", true)]
    fn terminal_statuses_are_dropped(#[case] status: &str, #[case] kept: bool) {
        let out = post_filter(vec![sub("c1", status, "4.9.0")], &Filter::default(), now());
        assert_eq!(out.len() == 1, kept);
    }

    #[test]
    fn records_without_cluster_id_are_dropped() {
        let out = post_filter(vec![sub("", "Active", "4.9.0")], &Filter::default(), now());
        assert!(out.is_empty());
    }

    #[rstest]
    #[case("4.9.12", true)]
    #[case("4.10.3", true)]
    #[case("4.10", true)]
    #[case("4.8.2", false)]
    #[case("4.1.0", false)]
    #[case("", false)]
    fn version_allow_list_matches_major_minor(#[case] reported: &str, #[case] kept: bool) {
        let filter = Filter {
            open_shift_versions: vec!["4.9".to_string(), "4.10".to_string()],
            ..Default::default()
        };
        let out = post_filter(vec![sub("c1", "Active", reported)], &filter, now());
        assert_eq!(out.len() == 1, kept, "{reported}");
    }

    #[test]
    fn version_filter_drops_records_without_metrics() {
        let filter = Filter {
            open_shift_versions: vec!["4.9".to_string()],
            ..Default::default()
        };
        let mut s = sub("c1", "Active", "4.9.0");
        s.metrics.clear();
        assert!(post_filter(vec![s], &filter, now()).is_empty());
    }

    #[test]
    fn allow_lists_are_case_insensitive() {
        let spec = DiscoveredClusterSpec {
            type_: "ROSA".to_string(),
            cloud_provider: "aws".to_string(),
            region: "us-east-1".to_string(),
            ..Default::default()
        };

        let filter = Filter {
            cluster_types: vec!["rosa".to_string()],
            infrastructure_providers: vec!["AWS".to_string()],
            ..Default::default()
        };
        assert!(matches_allow_lists(&spec, &filter));

        let other_region = Filter {
            regions: vec!["eu-west-1".to_string()],
            ..Default::default()
        };
        assert!(!matches_allow_lists(&spec, &other_region));
    }
}
