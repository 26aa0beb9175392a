//! Application-wide constants

/// Largest id/handle batch the platform accepts in one lookup.
pub(crate) const LOOKUP_BATCH_SIZE: usize = 100;

/// Prefix for environment overrides of settings and secrets.
pub(crate) const ENV_PREFIX: &str = "PUNTGUN_";

/// Source rule keywords
pub(crate) const SOURCE_HANDLES: &str = "handles";
pub(crate) const SOURCE_IDS: &str = "ids";
pub(crate) const SOURCE_MY_FOLLOWERS: &str = "my_followers";
pub(crate) const SOURCE_WHO_LIKED: &str = "who_liked";
pub(crate) const SOURCE_WHO_RETWEETED: &str = "who_retweeted";

/// Filter rule keywords
pub(crate) const FILTER_FOLLOWER: &str = "follower";
pub(crate) const FILTER_FOLLOWING: &str = "following";
pub(crate) const FILTER_POST_COUNT: &str = "post_count";
pub(crate) const FILTER_USER_CREATED: &str = "user_created";
pub(crate) const FILTER_USER_TEXTS_MATCH: &str = "user_texts_match";
pub(crate) const FILTER_VERIFIED: &str = "verified";
pub(crate) const FILTER_PROTECTED: &str = "protected";
pub(crate) const FILTER_PINNED_POST_MATCH: &str = "pinned_post_match";
pub(crate) const FILTER_IS_MY_FOLLOWER: &str = "is_my_follower";
pub(crate) const FILTER_IS_MY_FOLLOWING: &str = "is_my_following";

/// Rule set keywords (shared between families)
pub(crate) const SET_ALL_OF: &str = "all_of";
pub(crate) const SET_ANY_OF: &str = "any_of";
pub(crate) const SET_WEIGHT_OF: &str = "weight_of";

/// Action rule keywords
pub(crate) const ACTION_BLOCK: &str = "block";
pub(crate) const ACTION_MUTE: &str = "mute";

/// Placeholder keyword substituted for rules that failed to parse
pub(crate) const PLACEHOLDER: &str = "placeholder";

/// Record type tags in the report
pub(crate) const RECORD_DECISION: &str = "decision";
pub(crate) const RECORD_PARTIAL_ERRORS: &str = "partial_errors";
pub(crate) const RECORD_WARNING: &str = "warning";
