use bloom_compositor::logluv;
use bloom_compositor::{
    AllocationError, BloomPipeline, BloomSettings, CpuSubstrate, DrawRect, ImageHandle, PipelineError,
    PipelineState, RenderSubstrate, ThresholdParams,
};
use glam::Vec3;
use image::{Rgba, RgbaImage};

fn encoded(rgb: Vec3) -> Rgba<u8> {
    Rgba(logluv::quantize(logluv::encode(rgb)))
}

/// 96x96 black scene with an 8x8 square of linear grey 8 at 44..=51.
fn square_scene(substrate: &mut CpuSubstrate) -> ImageHandle {
    let mut pixels = RgbaImage::new(96, 96);
    for y in 44..52 {
        for x in 44..52 {
            pixels.put_pixel(x, y, encoded(Vec3::splat(8.0)));
        }
    }
    let scene = substrate.allocate_image(96, 96).unwrap();
    substrate.write_pixels(scene, &pixels).unwrap();
    scene
}

fn uniform_scene(substrate: &mut CpuSubstrate, width: u32, height: u32, rgb: Vec3) -> ImageHandle {
    let scene = substrate.allocate_image(width, height).unwrap();
    substrate
        .write_pixels(scene, &RgbaImage::from_pixel(width, height, encoded(rgb)))
        .unwrap();
    scene
}

fn is_opaque_black(frame: &RgbaImage) -> bool {
    frame.pixels().all(|p| p.0 == [0, 0, 0, 255])
}

#[test]
fn test_black_scene_stays_black() {
    let mut substrate = CpuSubstrate::new();
    let mut pipeline = BloomPipeline::new(&mut substrate, BloomSettings::default()).unwrap();
    let scene = substrate.allocate_image(64, 48).unwrap();

    let output = pipeline.post_process(&mut substrate, scene).unwrap();
    let frame = substrate.read_pixels(output).unwrap();
    assert_eq!(frame.dimensions(), (64, 48));
    assert!(is_opaque_black(&frame));
}

#[test]
fn test_resize_reallocates_without_residue() {
    let mut substrate = CpuSubstrate::new();
    let mut pipeline = BloomPipeline::new(&mut substrate, BloomSettings::default()).unwrap();

    let small = uniform_scene(&mut substrate, 100, 100, Vec3::splat(8.0));
    let first = pipeline.post_process(&mut substrate, small).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Ready { width: 100, height: 100 });
    assert_eq!(substrate.read_pixels(first).unwrap().get_pixel(50, 50).0, [255, 255, 255, 255]);

    let large = substrate.allocate_image(200, 200).unwrap();
    let second = pipeline.post_process(&mut substrate, large).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Ready { width: 200, height: 200 });
    assert_eq!(substrate.image_dimensions(second).unwrap(), (200, 200));

    let frame = substrate.read_pixels(second).unwrap();
    assert!(is_opaque_black(&frame));
    // The superseded buffers were released.
    assert_ne!(first, second);
    assert!(substrate.image_dimensions(first).is_err());
    assert_eq!(substrate.live_images(), 4);
}

#[test]
fn test_bright_square_blooms_into_surroundings() {
    let mut substrate = CpuSubstrate::new();
    let mut pipeline = BloomPipeline::new(&mut substrate, BloomSettings::default()).unwrap();
    let scene = square_scene(&mut substrate);

    let output = pipeline.post_process(&mut substrate, scene).unwrap();
    let frame = substrate.read_pixels(output).unwrap();

    assert_eq!(frame.get_pixel(47, 47).0, [255, 255, 255, 255]);
    let glow = frame.get_pixel(58, 48).0;
    assert!(glow[0] > 0 && glow[1] > 0 && glow[2] > 0, "{glow:?}");
    assert_eq!(glow[3], 255);

    // Glow fades with distance from the square.
    let near = frame.get_pixel(54, 48).0[1];
    let far = frame.get_pixel(70, 48).0[1];
    assert!(near >= glow[1] && glow[1] >= far, "{near} {} {far}", glow[1]);

    // Roughly symmetric about the square's centre.
    let left = frame.get_pixel(95 - 58, 48).0[1] as i32;
    assert!((left - glow[1] as i32).abs() <= 2);
}

#[test]
fn test_high_threshold_disables_bloom() {
    let mut substrate = CpuSubstrate::new();
    let mut pipeline = BloomPipeline::new(&mut substrate, BloomSettings::default()).unwrap();
    let scene = square_scene(&mut substrate);

    let params = ThresholdParams {
        luma_threshold: 1000.0,
        bloom_strength: 0.2,
    };
    let output = pipeline.post_process_with(&mut substrate, scene, params).unwrap();
    let frame = substrate.read_pixels(output).unwrap();
    assert_eq!(frame.get_pixel(58, 48).0, [0, 0, 0, 255]);
    assert_eq!(frame.get_pixel(47, 47).0, [255, 255, 255, 255]);
}

#[test]
fn test_strength_scales_glow() {
    let mut substrate = CpuSubstrate::new();
    let mut pipeline = BloomPipeline::new(&mut substrate, BloomSettings::default()).unwrap();
    let scene = square_scene(&mut substrate);

    let weak = pipeline.post_process(&mut substrate, scene).unwrap();
    let weak = substrate.read_pixels(weak).unwrap().get_pixel(60, 48).0[0];

    pipeline.set_settings(BloomSettings {
        luma_threshold: 2.0,
        bloom_strength: 0.8,
    });
    let strong = pipeline.post_process(&mut substrate, scene).unwrap();
    let strong = substrate.read_pixels(strong).unwrap().get_pixel(60, 48).0[0];
    assert!(strong > weak, "{strong} <= {weak}");
}

#[test]
fn test_draw_image_copies_into_scene() {
    let mut substrate = CpuSubstrate::new();
    let pipeline = BloomPipeline::new(&mut substrate, BloomSettings::default()).unwrap();

    let source = substrate.allocate_image(4, 4).unwrap();
    substrate
        .write_pixels(source, &RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 0])))
        .unwrap();
    let scene = substrate.allocate_image(16, 16).unwrap();
    pipeline
        .draw_image(&mut substrate, scene, source, DrawRect::new(4.0, 4.0, 8.0, 8.0), Vec3::splat(2.0))
        .unwrap();

    let pixels = substrate.read_pixels(scene).unwrap();
    for (x, y, px) in pixels.enumerate_pixels() {
        let inside = (4..12).contains(&x) && (4..12).contains(&y);
        let rgb = logluv::decode(logluv::dequantize(px.0));
        if inside {
            assert!((rgb - Vec3::splat(2.0)).abs().max_element() < 0.05, "({x}, {y}) {rgb:?}");
        } else {
            assert_eq!(px.0, [0, 0, 0, 0], "({x}, {y})");
        }
    }
}

#[test]
fn test_allocation_failure_is_fatal_for_the_frame() {
    let mut substrate = CpuSubstrate::new().with_memory_budget(64 * 64 * 4 * 2);
    let mut pipeline = BloomPipeline::new(&mut substrate, BloomSettings::default()).unwrap();
    let scene = substrate.allocate_image(64, 64).unwrap();

    let err = pipeline.post_process(&mut substrate, scene).unwrap_err();
    assert!(matches!(err, PipelineError::Allocation(AllocationError::OutOfMemory { .. })));
    assert_eq!(pipeline.state(), PipelineState::Uninitialized);

    // A smaller scene fits next to the large one.
    let small = substrate.allocate_image(16, 16).unwrap();
    pipeline.post_process(&mut substrate, small).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Ready { width: 16, height: 16 });
}

#[test]
fn test_release_returns_scratch_memory() {
    let mut substrate = CpuSubstrate::new();
    let mut pipeline = BloomPipeline::new(&mut substrate, BloomSettings::default()).unwrap();
    let scene = substrate.allocate_image(32, 32).unwrap();
    pipeline.post_process(&mut substrate, scene).unwrap();
    assert_eq!(substrate.memory_used(), 3 * 32 * 32 * 4);

    pipeline.release(&mut substrate);
    assert_eq!(substrate.memory_used(), 32 * 32 * 4);
}
