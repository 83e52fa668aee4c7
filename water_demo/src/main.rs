//! Water demo application
//!
//! Runs a few frames of a configured rendering pipeline over a scenery with
//! randomly placed blocks and a reflective lake, logging every device command.
//!
//! Usage: `water_demo [pipeline.toml|pipeline.ron]`

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use breeze_render::foundation::logging;
use breeze_render::prelude::*;
use breeze_render::render::PassBinding;
use rand::Rng;

const FRAME_COUNT: u32 = 3;
const BLOCK_COUNT: u32 = 12;
const FRAME_TIME: f32 = 1.0 / 60.0;

#[derive(thiserror::Error, Debug)]
enum DemoError {
    #[error("Config error: {0}")]
    Config(#[from] breeze_render::config::ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Water error: {0}")]
    Water(#[from] breeze_render::controllers::WaterError),

    #[error("Pipeline has no stage or queue named '{0}'")]
    MissingSlot(&'static str),
}

/// Device context that only logs what it is asked to do
#[derive(Default)]
struct LoggingDevice {
    draws: u32,
}

impl DeviceContext for LoggingDevice {
    fn bind_pass(&mut self, binding: &PassBinding<'_>) {
        log::debug!("bind {} technique {} pass {}", binding.effect, binding.technique, binding.pass);
    }

    fn set_constants(&mut self, slot: u32, data: &[u8]) {
        log::trace!("constants slot {} ({} bytes)", slot, data.len());
    }

    fn draw(&mut self, draw: DrawCall) {
        self.draws += 1;
        log::debug!(
            "draw {} vertices x {} instances from {}",
            draw.vertex_count,
            draw.instance_count,
            draw.first_instance
        );
    }
}

/// Unit block drawn in one queue
struct Block {
    id: u32,
    transform: Transform,
    stage: StageId,
    queue: QueueId,
}

impl Renderable for Block {
    fn attached(&self, data: &mut RenderableData) {
        data.bounds = Sphere::new(self.transform.position, 0.9);
    }

    fn attach_pass(&self, pass_idx: u32, pass: &mut RenderablePass) -> bool {
        *pass = RenderablePass::new(self.stage, self.queue, self.id % 3, pass_idx);
        true
    }

    fn pass_count(&self) -> u32 {
        1
    }

    fn render(&self, _job: &RenderJob, _perspective: &Perspective, context: &mut dyn DeviceContext) {
        context.draw(DrawCall {
            vertex_count: 36,
            instance_count: 1,
            first_instance: self.id,
        });
    }
}

fn load_config() -> Result<PipelineConfig, DemoError> {
    match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading pipeline config from {}", path);
            Ok(PipelineConfig::load_or_default(&path)?)
        }
        None => Ok(PipelineConfig::default()),
    }
}

fn run() -> Result<(), DemoError> {
    let config = load_config()?;
    let mut pipeline = RenderingPipeline::from_config("water_demo", &config)?;

    let opaque = pipeline.stage_id("Opaque").ok_or(DemoError::MissingSlot("Opaque"))?;
    let default_queue = pipeline.queue_id("Default").ok_or(DemoError::MissingSlot("Default"))?;
    let sorted_queue = pipeline.queue_id("Sorted").ok_or(DemoError::MissingSlot("Sorted"))?;

    let scenery = Rc::new(BasicScenery::new());
    let mut rng = rand::thread_rng();
    for id in 0..BLOCK_COUNT {
        let position = Vec3::new(rng.gen_range(-8.0..8.0), rng.gen_range(0.0..3.0), rng.gen_range(-8.0..8.0));
        scenery.add_renderable(Rc::new(Block {
            id,
            transform: Transform::from_position(position),
            stage: opaque,
            queue: default_queue,
        }));
    }

    let lake = Arc::new(
        Material::new("Lake", "water.fx").with_technique(
            MaterialTechnique::new("Surface").with_pass(MaterialPass::new(opaque, sorted_queue, 0)),
        ),
    );
    let waves = Arc::new(EffectDriver::new("Waves", vec![0.4, 1.5, 0.0, 0.0]));
    let controllers = Rc::new(RefCell::new(WaterControllers::new(WaterDefaults {
        material: Some(lake),
        effect_driver: Some(waves),
        reflective: true,
    })));
    let mut lake_config = WaterConfig {
        transform: Transform::from_position_scale(Vec3::new(0.0, -0.5, 0.0), Vec3::new(10.0, 1.0, 10.0)),
        ..WaterConfig::default()
    };
    let lake_handle = controllers.borrow_mut().add_controller(lake_config.clone());
    scenery.add_renderable(Rc::new(WaterRenderable::new(controllers.clone())));

    let mut time = 0.0;
    for frame in 0..FRAME_COUNT {
        time += FRAME_TIME;

        // Calm the lake after the first frame, a structural change
        if frame == 1 {
            controllers.borrow_mut().set_reflective(lake_handle, false)?;
        }
        lake_config.wave_scale = 1.0 + 0.5 * (time * 10.0).sin();
        controllers.borrow_mut().set_config(lake_handle, lake_config.clone())?;
        let outcome = controllers.borrow_mut().commit();
        log::debug!("Water commit: {:?}", outcome);
        scenery.refresh();

        pipeline.clear_perspectives();
        pipeline.add_scenery(scenery.clone());
        let camera = PerspectiveDesc::look_at(
            Vec3::new(0.0, 4.0, 14.0),
            Vec3::zeros(),
            Vec3::y(),
            std::f32::consts::FRAC_PI_3,
            16.0 / 9.0,
            0.1,
            200.0,
        )
        .with_time(time, FRAME_TIME);
        pipeline.add_perspective(camera, None, None, StageMask::EMPTY)?;
        pipeline.prepare()?;

        let mut device = LoggingDevice::default();
        pipeline.render(&mut device);
        log::info!(
            "Frame {}: {} perspectives, {} draws, {} water rebuilds",
            frame,
            pipeline.perspective_count(),
            device.draws,
            controllers.borrow().rebuild_count()
        );
    }

    pipeline.release();
    Ok(())
}

fn main() {
    logging::init_with_level(log::LevelFilter::Info);

    if let Err(err) = run() {
        log::error!("Water demo failed: {}", err);
        std::process::exit(1);
    }
}
