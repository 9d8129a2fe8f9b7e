//! Per-user state components backed by the generic stores.

pub mod banned_users;
pub mod category;
pub mod forum_topics;
pub mod language;
pub mod user_group;
mod utils;

pub use banned_users::BannedUsersStore;
pub use category::{Category, CategoryHandler, CategorySelectedContext, CategorySelectedHook, CategoryStore};
pub use forum_topics::{
    CategoryForumTopicStore, ForumTopicIconColor, ForumTopicSpec, ForumTopicStore, ForumTopicStoreErrorMessages,
};
pub use language::{
    DummyLanguageStore, LanguageChangeContext, LanguageChangeHook, LanguageLabelPart, LanguageSelectionHandler,
    LanguageSelectionMenuConfig, LanguageStore, LanguageStoreInterface,
};
pub use user_group::{UserGroupStore, UserIdIdentity, UserIdentity, UsernameIdentity};
pub use utils::callback_query_processing_error;
