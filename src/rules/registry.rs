//! Keyword → constructor tables, one per rule family.
//!
//! The registry is built once at startup with [`RuleRegistry::builtin`] and
//! handed to the parser. Registering the same keyword twice within a family
//! is a programming error and fails the build of the registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{ActionRule, FilterRule, SourceRule};
use super::{action_block, filter_created, filter_flags, filter_numeric};
use super::{filter_relationship, filter_text, set, source, source_followers};
use crate::constants::*;
use crate::errors::RegistryError;
use crate::parser::{Parser, RuleNode};

pub type SourceConstructor = fn(&mut Parser<'_>, &RuleNode<'_>) -> Option<Arc<dyn SourceRule>>;
pub type FilterConstructor = fn(&mut Parser<'_>, &RuleNode<'_>) -> Option<Arc<dyn FilterRule>>;
pub type ActionConstructor = fn(&mut Parser<'_>, &RuleNode<'_>) -> Option<Arc<dyn ActionRule>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleFamily {
    Source,
    Filter,
    Action,
}

impl fmt::Display for RuleFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Source => "source",
            Self::Filter => "filter",
            Self::Action => "action",
        })
    }
}

#[derive(Default)]
pub struct RuleRegistry {
    sources: HashMap<&'static str, SourceConstructor>,
    filters: HashMap<&'static str, FilterConstructor>,
    actions: HashMap<&'static str, ActionConstructor>,
    reserved: HashMap<&'static str, RuleFamily>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every rule this crate ships.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new()
            .register_source(SOURCE_HANDLES, source::parse_handles)?
            .register_source(SOURCE_IDS, source::parse_ids)?
            .register_source(SOURCE_MY_FOLLOWERS, source_followers::parse_my_followers)?
            .register_source(SOURCE_WHO_LIKED, source::parse_who_liked)?
            .register_source(SOURCE_WHO_RETWEETED, source::parse_who_retweeted)?
            .register_source(SET_ANY_OF, set::parse_source_any_of)?
            .register_filter(FILTER_FOLLOWER, filter_numeric::parse_follower)?
            .register_filter(FILTER_FOLLOWING, filter_numeric::parse_following)?
            .register_filter(FILTER_POST_COUNT, filter_numeric::parse_post_count)?
            .register_filter(FILTER_USER_CREATED, filter_created::parse_user_created)?
            .register_filter(FILTER_USER_TEXTS_MATCH, filter_text::parse_user_texts_match)?
            .register_filter(FILTER_PINNED_POST_MATCH, filter_text::parse_pinned_post_match)?
            .register_filter(FILTER_VERIFIED, filter_flags::parse_verified)?
            .register_filter(FILTER_PROTECTED, filter_flags::parse_protected)?
            .register_filter(FILTER_IS_MY_FOLLOWER, filter_relationship::parse_is_my_follower)?
            .register_filter(FILTER_IS_MY_FOLLOWING, filter_relationship::parse_is_my_following)?
            .register_filter(SET_ALL_OF, set::parse_all_of)?
            .register_filter(SET_ANY_OF, set::parse_any_of)?
            .register_filter(SET_WEIGHT_OF, set::parse_weight_of)?
            .register_action(ACTION_BLOCK, action_block::parse_block)?
            .reserve(RuleFamily::Action, ACTION_MUTE)
    }

    pub fn register_source(
        mut self,
        keyword: &'static str,
        constructor: SourceConstructor,
    ) -> Result<Self, RegistryError> {
        self.check_free(RuleFamily::Source, keyword)?;
        self.sources.insert(keyword, constructor);
        Ok(self)
    }

    pub fn register_filter(
        mut self,
        keyword: &'static str,
        constructor: FilterConstructor,
    ) -> Result<Self, RegistryError> {
        self.check_free(RuleFamily::Filter, keyword)?;
        self.filters.insert(keyword, constructor);
        Ok(self)
    }

    pub fn register_action(
        mut self,
        keyword: &'static str,
        constructor: ActionConstructor,
    ) -> Result<Self, RegistryError> {
        self.check_free(RuleFamily::Action, keyword)?;
        self.actions.insert(keyword, constructor);
        Ok(self)
    }

    /// Claim a keyword that has no implementation yet.
    pub fn reserve(
        mut self,
        family: RuleFamily,
        keyword: &'static str,
    ) -> Result<Self, RegistryError> {
        self.check_free(family, keyword)?;
        self.reserved.insert(keyword, family);
        Ok(self)
    }

    pub fn source(&self, keyword: &str) -> Option<SourceConstructor> {
        self.sources.get(keyword).copied()
    }

    pub fn filter(&self, keyword: &str) -> Option<FilterConstructor> {
        self.filters.get(keyword).copied()
    }

    pub fn action(&self, keyword: &str) -> Option<ActionConstructor> {
        self.actions.get(keyword).copied()
    }

    pub fn is_reserved(&self, family: RuleFamily, keyword: &str) -> bool {
        self.reserved.get(keyword) == Some(&family)
    }

    /// Families that implement `keyword`, in source, filter, action order.
    pub fn families_of(&self, keyword: &str) -> Vec<RuleFamily> {
        [RuleFamily::Source, RuleFamily::Filter, RuleFamily::Action]
            .into_iter()
            .filter(|family| self.contains(*family, keyword))
            .collect()
    }

    /// Registered keywords of one family, sorted.
    pub fn keywords(&self, family: RuleFamily) -> Vec<&'static str> {
        let mut keywords: Vec<&'static str> = match family {
            RuleFamily::Source => self.sources.keys().copied().collect(),
            RuleFamily::Filter => self.filters.keys().copied().collect(),
            RuleFamily::Action => self.actions.keys().copied().collect(),
        };
        keywords.sort_unstable();
        keywords
    }

    fn contains(&self, family: RuleFamily, keyword: &str) -> bool {
        match family {
            RuleFamily::Source => self.sources.contains_key(keyword),
            RuleFamily::Filter => self.filters.contains_key(keyword),
            RuleFamily::Action => self.actions.contains_key(keyword),
        }
    }

    fn check_free(&self, family: RuleFamily, keyword: &str) -> Result<(), RegistryError> {
        if self.contains(family, keyword) || self.is_reserved(family, keyword) {
            return Err(RegistryError::KeywordCollision {
                family: family.to_string(),
                keyword: keyword.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_loads() {
        let registry = RuleRegistry::builtin().unwrap();
        assert!(registry.source("handles").is_some());
        assert!(registry.filter("weight_of").is_some());
        assert!(registry.action("block").is_some());
        assert!(registry.action("mute").is_none());
        assert!(registry.is_reserved(RuleFamily::Action, "mute"));
    }

    #[test]
    fn test_any_of_exists_in_two_families() {
        let registry = RuleRegistry::builtin().unwrap();
        assert_eq!(
            registry.families_of("any_of"),
            vec![RuleFamily::Source, RuleFamily::Filter]
        );
        assert_eq!(registry.families_of("block"), vec![RuleFamily::Action]);
    }

    #[test]
    fn test_collision_within_family_is_rejected() {
        let result = RuleRegistry::new()
            .register_filter("verified", filter_flags::parse_verified)
            .and_then(|r| r.register_filter("verified", filter_flags::parse_protected));

        match result {
            Err(RegistryError::KeywordCollision { family, keyword }) => {
                assert_eq!(family, "filter");
                assert_eq!(keyword, "verified");
            }
            Ok(_) => panic!("expected a collision"),
        }
    }

    #[test]
    fn test_reserved_keyword_collides() {
        let result = RuleRegistry::new()
            .reserve(RuleFamily::Action, "mute")
            .and_then(|r| r.register_action("mute", action_block::parse_block));
        assert!(result.is_err());
    }
}
