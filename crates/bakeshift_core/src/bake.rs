//! Transform baking.
//!
//! Replaces whatever drives a node's nine TRS channels with per-frame
//! keyframes, then cuts the links a simulation bake leaves behind so an
//! exporter walking connections cannot rediscover the original driver.

use bakeshift_math::BakeRange;
use thiserror::Error;

use crate::report::{SkippedNode, Stage};
use crate::scene::{Channel, HostScene, NodeId, SceneError, SceneResult, SourceKind};

/// Errors that can occur while baking a node.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BakeError {
    #[error(transparent)]
    Scene(#[from] SceneError),

    #[error("{node}.{channel} is still driven by a {kind:?} source after baking")]
    ResidualDriver {
        node: NodeId,
        channel: Channel,
        kind: SourceKind,
    },
}

/// Result type for baking operations.
pub type BakeResult<T> = Result<T, BakeError>;

/// Bake one node's channels over `range` in place.
///
/// Returns how many residual driver links were severed. Afterwards every
/// channel is either constant or driven only by keyframe curves.
pub fn bake_transform<S: HostScene + ?Sized>(
    scene: &mut S,
    node: NodeId,
    range: BakeRange,
) -> BakeResult<usize> {
    for channel in Channel::ALL {
        scene.unlock_channel(node, channel)?;
    }

    scene.bake_simulation(&[node], range)?;
    let severed = sever_non_curve_inputs(scene, node)?;

    for channel in Channel::ALL {
        if let Some(input) = scene
            .channel_inputs(node, channel)?
            .into_iter()
            .find(|input| !input.kind.is_curve())
        {
            return Err(BakeError::ResidualDriver {
                node,
                channel,
                kind: input.kind,
            });
        }
    }

    log::debug!(
        "Baked {} over {}..={} ({} links severed)",
        node,
        range.start(),
        range.end(),
        severed
    );
    Ok(severed)
}

/// Bake each node independently. A failure excludes that node only.
pub fn bake_transforms<S: HostScene + ?Sized>(
    scene: &mut S,
    nodes: &[NodeId],
    range: BakeRange,
) -> (Vec<NodeId>, Vec<SkippedNode>) {
    let mut baked = Vec::with_capacity(nodes.len());
    let mut skipped = Vec::new();

    for &node in nodes {
        match bake_transform(scene, node, range) {
            Ok(_) => baked.push(node),
            Err(e) => {
                log::warn!("Failed to bake {}: {}", node, e);
                skipped.push(SkippedNode::new(&*scene, node, Stage::Bake, e));
            }
        }
    }

    (baked, skipped)
}

/// Disconnect every non-curve input on the node's TRS channels.
pub fn sever_non_curve_inputs<S: HostScene + ?Sized>(scene: &mut S, node: NodeId) -> SceneResult<usize> {
    let mut severed = 0;
    for channel in Channel::ALL {
        for input in scene.channel_inputs(node, channel)? {
            if input.kind.is_curve() {
                continue;
            }
            scene.disconnect(node, channel, input.id)?;
            severed += 1;
        }
    }
    Ok(severed)
}

/// True if no TRS channel has a non-curve input.
pub fn is_curve_only<S: HostScene + ?Sized>(scene: &S, node: NodeId) -> SceneResult<bool> {
    for channel in Channel::ALL {
        if scene
            .channel_inputs(node, channel)?
            .iter()
            .any(|input| !input.kind.is_curve())
        {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{
        AnimCurve, ConstraintKind, Expression, Key, MemoryScene, TransformCache,
    };

    fn range(start: i32, end: i32) -> BakeRange {
        BakeRange::new(start, end).unwrap()
    }

    #[test]
    fn test_constrained_locator_bakes_to_curves() {
        let mut scene = MemoryScene::new("test");
        let target = scene.add_locator("target", None).unwrap();
        scene
            .connect_curve(
                target,
                Channel::TranslateZ,
                AnimCurve::from_keys([Key::linear(1.0, 0.0), Key::linear(10.0, -9.0)]),
            )
            .unwrap();
        let locator = scene.add_locator("follower", None).unwrap();
        scene
            .create_constraint(target, locator, ConstraintKind::Parent)
            .unwrap();
        let before: Vec<f64> = (1..=10)
            .map(|f| scene.channel_value(locator, Channel::TranslateZ, f).unwrap())
            .collect();

        let severed = bake_transform(&mut scene, locator, range(1, 10)).unwrap();

        assert_eq!(severed, 6);
        assert!(is_curve_only(&scene, locator).unwrap());
        for channel in Channel::ALL {
            let inputs = scene.channel_inputs(locator, channel).unwrap();
            assert!(inputs.iter().all(|input| input.kind == SourceKind::Curve));
        }
        for (frame, expected) in (1..=10).zip(before) {
            let value = scene.channel_value(locator, Channel::TranslateZ, frame).unwrap();
            assert!((value - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_bake_unlocks_channels() {
        let mut scene = MemoryScene::new("test");
        let locator = scene.add_locator("spinner", None).unwrap();
        scene.lock_channel(locator, Channel::RotateY).unwrap();
        scene
            .connect_expression(
                locator,
                Channel::RotateY,
                Expression::Linear {
                    rate: 10.0,
                    offset: 0.0,
                },
            )
            .unwrap();

        bake_transform(&mut scene, locator, range(1, 5)).unwrap();

        assert_eq!(scene.channel_flags(locator, Channel::RotateY).unwrap(), (false, true));
        assert!(is_curve_only(&scene, locator).unwrap());
        assert_eq!(scene.channel_value(locator, Channel::RotateY, 3).unwrap(), 30.0);
    }

    #[test]
    fn test_cache_driver_is_severed() {
        let mut scene = MemoryScene::new("test");
        let locator = scene.add_locator("cached", None).unwrap();
        let cache = TransformCache {
            samples: [(1, 0.0), (2, 4.0), (3, 8.0)].into_iter().collect(),
        };
        scene.connect_cache(locator, Channel::TranslateX, cache).unwrap();

        bake_transform(&mut scene, locator, range(1, 3)).unwrap();

        assert!(is_curve_only(&scene, locator).unwrap());
        assert_eq!(scene.channel_value(locator, Channel::TranslateX, 2).unwrap(), 4.0);
    }

    #[test]
    fn test_bake_leaves_parent_alone() {
        let mut scene = MemoryScene::new("test");
        let parent = scene.add_transform("grp", None).unwrap();
        scene
            .connect_expression(parent, Channel::TranslateY, Expression::Linear { rate: 1.0, offset: 0.0 })
            .unwrap();
        let child = scene.add_locator("child", Some(parent)).unwrap();

        bake_transform(&mut scene, child, range(1, 3)).unwrap();

        let inputs = scene.channel_inputs(parent, Channel::TranslateY).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].kind, SourceKind::Expression);
    }

    #[test]
    fn test_bake_transforms_skips_failures() {
        let mut scene = MemoryScene::new("test");
        let locator = scene.add_locator("ok", None).unwrap();

        let (baked, skipped) = bake_transforms(&mut scene, &[NodeId(77), locator], range(1, 2));

        assert_eq!(baked, vec![locator]);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].stage, Stage::Bake);
    }
}
