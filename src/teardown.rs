// Ordered teardown
//
// GPU objects are destroyed stage by stage in an explicit order instead of
// relying on struct field drop order. Owners implement `Teardown` for the
// stages they hold; stages they don't hold are ignored, and destroying an
// already destroyed stage is a no-op.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    MeshBuffers,
    StagingBuffers,
    FrameSync,
    ImageViews,
    DepthImage,
    MultisampleImage,
    Swapchain,
    Framebuffers,
    Descriptors,
    UniformBuffers,
    CommandBuffers,
    CommandPool,
    Pipeline,
    DescriptorSetLayout,
    Surface,
}

/// What the window integration owns, in the order it must go.
pub const WINDOW_ORDER: [Stage; 5] = [
    Stage::ImageViews,
    Stage::DepthImage,
    Stage::MultisampleImage,
    Stage::Swapchain,
    Stage::Surface,
];

/// Swapchain recreation: everything sized or counted by the swapchain.
/// The device must be idle before this runs.
pub const RECREATE_ORDER: [Stage; 8] = [
    Stage::ImageViews,
    Stage::DepthImage,
    Stage::MultisampleImage,
    Stage::Swapchain,
    Stage::Framebuffers,
    Stage::Descriptors,
    Stage::UniformBuffers,
    Stage::CommandBuffers,
];

/// Full engine shutdown. The device itself goes last, when its final
/// `Arc` is released.
pub const ENGINE_ORDER: [Stage; 15] = [
    Stage::MeshBuffers,
    Stage::StagingBuffers,
    Stage::FrameSync,
    Stage::ImageViews,
    Stage::DepthImage,
    Stage::MultisampleImage,
    Stage::Swapchain,
    Stage::Framebuffers,
    Stage::Descriptors,
    Stage::UniformBuffers,
    Stage::CommandBuffers,
    Stage::CommandPool,
    Stage::Pipeline,
    Stage::DescriptorSetLayout,
    Stage::Surface,
];

pub trait Teardown {
    fn destroy_stage(&mut self, stage: Stage);
}

pub fn run<T: Teardown + ?Sized>(target: &mut T, order: &[Stage]) {
    for &stage in order {
        log::debug!("Teardown: {:?}", stage);
        target.destroy_stage(stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Default)]
    struct Recorder(Vec<Stage>);

    impl Teardown for Recorder {
        fn destroy_stage(&mut self, stage: Stage) {
            self.0.push(stage);
        }
    }

    fn position(order: &[Stage], stage: Stage) -> usize {
        order.iter().position(|&s| s == stage).unwrap()
    }

    #[test]
    fn run_visits_stages_in_order() {
        let mut recorder = Recorder::default();
        run(&mut recorder, &RECREATE_ORDER);
        assert_eq!(recorder.0, RECREATE_ORDER.to_vec());
    }

    #[test]
    fn recreation_destroys_views_then_images_then_swapchain_then_framebuffers() {
        let order = RECREATE_ORDER;
        assert!(position(&order, Stage::ImageViews) < position(&order, Stage::DepthImage));
        assert!(position(&order, Stage::DepthImage) < position(&order, Stage::Swapchain));
        assert!(position(&order, Stage::MultisampleImage) < position(&order, Stage::Swapchain));
        assert!(position(&order, Stage::Swapchain) < position(&order, Stage::Framebuffers));
        assert!(!order.contains(&Stage::Surface));
        assert!(!order.contains(&Stage::Pipeline));
    }

    #[test]
    fn engine_order_contains_recreation_sequence_and_each_stage_once() {
        let unique: HashSet<_> = ENGINE_ORDER.iter().collect();
        assert_eq!(unique.len(), ENGINE_ORDER.len());

        let start = position(&ENGINE_ORDER, Stage::ImageViews);
        assert_eq!(&ENGINE_ORDER[start..start + RECREATE_ORDER.len()], &RECREATE_ORDER);
    }

    #[test]
    fn engine_order_releases_users_before_what_they_use() {
        let order = ENGINE_ORDER;
        assert_eq!(*order.last().unwrap(), Stage::Surface);
        assert!(position(&order, Stage::Swapchain) < position(&order, Stage::Surface));
        assert!(position(&order, Stage::Framebuffers) < position(&order, Stage::Pipeline));
        assert!(position(&order, Stage::Descriptors) < position(&order, Stage::DescriptorSetLayout));
        assert!(position(&order, Stage::CommandBuffers) < position(&order, Stage::CommandPool));
    }

    #[test]
    fn window_order_is_a_subsequence_of_engine_order() {
        let positions: Vec<usize> = WINDOW_ORDER.iter().map(|&s| position(&ENGINE_ORDER, s)).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }
}
