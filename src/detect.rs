#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Detection {
    pub has_update: bool,
    /// Set only when `has_update` is true.
    pub new_episode_delta: Option<usize>,
    /// Set when the page lists fewer episodes than were stored.
    pub removed_episodes: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector;

impl ChangeDetector {
    pub fn detect(&self, old_count: usize, new_count: usize) -> Detection {
        if new_count > old_count {
            return Detection {
                has_update: true,
                new_episode_delta: Some(new_count - old_count),
                removed_episodes: None,
            };
        }
        Detection {
            has_update: false,
            new_episode_delta: None,
            removed_episodes: (new_count < old_count).then(|| old_count - new_count),
        }
    }
}
