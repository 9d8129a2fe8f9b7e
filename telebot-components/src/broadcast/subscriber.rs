use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use telebot_core::User;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub user_id: i64,
    pub username: Option<String>,
    pub full_name: String,
    /// Unix seconds.
    pub subscribed_at: f64,
}

impl Subscriber {
    pub fn from_user(user: &User, subscribed_at: f64) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            full_name: user.full_name(),
            subscribed_at,
        }
    }
}

// Timestamps compare bitwise so subscribers can live in hash sets.
impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id
            && self.username == other.username
            && self.full_name == other.full_name
            && self.subscribed_at.to_bits() == other.subscribed_at.to_bits()
    }
}

impl Eq for Subscriber {}

impl Hash for Subscriber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.user_id.hash(state);
        self.username.hash(state);
        self.full_name.hash(state);
        self.subscribed_at.to_bits().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_subscriber_from_user() {
        let user = User::new(42, "Ada").with_username("ada");
        let subscriber = Subscriber::from_user(&user, 1.5);
        assert_eq!(subscriber.user_id, 42);
        assert_eq!(subscriber.username.as_deref(), Some("ada"));
        assert_eq!(subscriber.full_name, "Ada");

        let set: HashSet<_> = [subscriber.clone(), subscriber].into_iter().collect();
        assert_eq!(set.len(), 1);
    }
}
