use super::{RouteWeights, Router, RouterError};
use crate::crd::release::Release;
use async_trait::async_trait;
use std::any::Any;

/// Router for providers without traffic splitting (`none`, `kubernetes`)
///
/// All traffic stays on the primary; writes are accepted and ignored.
#[derive(Debug, Default)]
pub struct NopRouter;

#[async_trait]
impl Router for NopRouter {
    fn name(&self) -> &'static str {
        "nop"
    }

    async fn get_routes(&self, _release: &Release) -> Result<RouteWeights, RouterError> {
        Ok(RouteWeights {
            primary: 100,
            canary: 0,
        })
    }

    async fn set_routes(&self, _release: &Release, weights: RouteWeights) -> Result<(), RouterError> {
        weights.validate()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
