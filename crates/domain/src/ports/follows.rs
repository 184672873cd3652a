use crate::DomainResult;
use crate::ports::BoxFuture;

#[derive(Clone, Debug, Default)]
pub struct FollowerPage {
    pub follower_ids: Vec<String>,
    pub next_cursor: Option<String>,
}

/// Read-only view of the social graph. The engine never writes follow edges;
/// it only resolves fan-out targets, one bounded page at a time.
pub trait FollowGraph: Send + Sync {
    fn followers_page(
        &self,
        followed_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<FollowerPage>>;
}
