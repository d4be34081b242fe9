/// 多相机标注融合 + 事件格式转换 命令行
///
/// 直接运行: cargo run --bin evlabel -- --help
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use evlabel_rs::classes::CLASSES_YAML;
use evlabel_rs::events;
use evlabel_rs::exclusion::{ExclusionRegion, RegionFormat, RegionSession};
use evlabel_rs::fusion::fuse_and_save;
use evlabel_rs::pipeline::{self, class_policy, run_track, TrackerKind};
use evlabel_rs::render::{ConsoleReview, DirectoryReview, Overlay, ReviewSink};
use evlabel_rs::rotate::{rotate_camera_dir, rotate_sequences};
use evlabel_rs::track::Review;
use evlabel_rs::utils::{HomographyConfig, HOMOGRAPHY_YAML};
use evlabel_rs::{init_logging, render_frames, PipelineConfig, TrackOutcome};

/// 标注流水线参数
#[derive(Parser, Debug)]
#[command(author, version, about = "多相机标注融合与事件格式转换", long_about = None)]
struct Args {
    /// 流水线配置文件 (不存在时写出默认配置)
    #[arg(short, long, default_value = "pipeline.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 跟踪一个序列的所有相机, 写出每相机标注
    Track {
        /// 序列目录
        sequence: PathBuf,

        /// 跟踪器: bytetrack 或 sidecar
        #[arg(long, value_enum, default_value_t = TrackerKind::Bytetrack)]
        tracker: TrackerKind,

        /// 类别配置 (classes.yaml); 省略时使用默认类名
        #[arg(long)]
        classes: Option<PathBuf>,

        /// 把渲染帧写入该目录
        #[arg(long)]
        render: Option<PathBuf>,

        /// 逐帧终端复核 (需要 --render)
        #[arg(long, requires = "render")]
        interactive: bool,
    },

    /// 把每相机标注投影到参考平面并融合
    Fuse {
        /// 序列目录
        sequence: PathBuf,

        /// 单应矩阵文件 (默认: 序列上级目录下的 homography_matrix.yaml)
        #[arg(long)]
        homography: Option<PathBuf>,
    },

    /// 厂商 HDF5 → 标准事件容器
    Convert {
        /// 序列目录
        sequence: PathBuf,

        /// 传感器宽度 (默认取配置)
        #[arg(short = 'W', long)]
        width: Option<u16>,

        /// 传感器高度 (默认取配置)
        #[arg(short = 'H', long)]
        height: Option<u16>,

        /// 180 度翻转坐标
        #[arg(short, long)]
        flip: bool,

        /// 输出文件 (默认: <sequence>/events/events.h5)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 按帧时间戳把标准事件容器渲染为图像帧
    Frames {
        /// 序列目录 (需要 events/events.h5 与 image_offsets.txt)
        sequence: PathBuf,

        /// 帧宽度 (默认取配置)
        #[arg(short = 'W', long)]
        width: Option<u16>,

        /// 帧高度 (默认取配置)
        #[arg(short = 'H', long)]
        height: Option<u16>,
    },

    /// 180 度旋转图像 (原地覆盖)
    Rotate {
        /// 根目录 (含多个序列), 或配合 --camera 的单个相机目录
        dir: PathBuf,

        /// 把 dir 当作单个相机目录处理
        #[arg(long)]
        camera: bool,
    },

    /// 对根目录下每个序列执行 跟踪 → 融合
    Annotate {
        root: PathBuf,

        #[arg(long, value_enum, default_value_t = TrackerKind::Bytetrack)]
        tracker: TrackerKind,
    },

    /// 对根目录下每个序列执行 事件转换 (→ 图像旋转)
    Prepare {
        root: PathBuf,

        #[arg(short, long)]
        flip: bool,
    },

    /// 根据给定矩形生成排除区域文件
    Regions {
        /// 参考帧 (用于绘制预览)
        #[arg(long)]
        image: PathBuf,

        /// 矩形角点 x0,y0,x1,y1 (可重复)
        #[arg(long = "rect", value_parser = parse_rect, required = true)]
        rects: Vec<(i32, i32, i32, i32)>,

        /// 输出目录 (通常为数据根目录)
        #[arg(long)]
        out: PathBuf,

        #[arg(long, value_enum, default_value_t = RegionFormat::Txt)]
        format: RegionFormat,

        /// 另存带区域的预览图
        #[arg(long)]
        preview: Option<PathBuf>,
    },
}

fn parse_rect(s: &str) -> std::result::Result<(i32, i32, i32, i32), String> {
    let values: Vec<i32> = s
        .split(',')
        .map(|v| v.trim().parse::<i32>().map_err(|e| format!("{:?}: {}", v, e)))
        .collect::<std::result::Result<_, _>>()?;
    match values[..] {
        [x0, y0, x1, y1] => Ok((x0, y0, x1, y1)),
        _ => Err(format!("expected x0,y0,x1,y1, got {:?}", s)),
    }
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let config = PipelineConfig::load(&args.config);
    config.print_summary();

    match args.command {
        Command::Track {
            sequence,
            tracker,
            classes,
            render,
            interactive,
        } => track(&config, &sequence, tracker, classes, render, interactive),

        Command::Fuse {
            sequence,
            homography,
        } => {
            let path = homography.unwrap_or_else(|| root_of(&sequence).join(HOMOGRAPHY_YAML));
            let homographies = HomographyConfig::load(&path)
                .with_context(|| format!("loading {}", path.display()))?;
            fuse_and_save(&sequence, &homographies, &config.camera_marker)?;
            Ok(())
        }

        Command::Convert {
            sequence,
            width,
            height,
            flip,
            output,
        } => {
            events::convert(
                &sequence,
                width.unwrap_or(config.event_width),
                height.unwrap_or(config.event_height),
                flip,
                output.as_deref(),
            )?;
            Ok(())
        }

        Command::Frames {
            sequence,
            width,
            height,
        } => {
            render_frames(
                &sequence,
                width.unwrap_or(config.event_width),
                height.unwrap_or(config.event_height),
            )?;
            Ok(())
        }

        Command::Rotate { dir, camera } => {
            let stats = if camera {
                rotate_camera_dir(&dir, config.rotate_workers)?
            } else {
                rotate_sequences(&dir, &config.camera_marker, config.rotate_workers)?
            };
            info!("✅ rotated {} images, {} failed", stats.rotated, stats.failed);
            Ok(())
        }

        Command::Annotate { root, tracker } => {
            pipeline::annotate(&root, &config, tracker)?;
            Ok(())
        }

        Command::Prepare { root, flip } => {
            pipeline::prepare(&root, &config, flip)?;
            Ok(())
        }

        Command::Regions {
            image,
            rects,
            out,
            format,
            preview,
        } => regions(&image, &rects, &out, format, preview.as_deref()),
    }
}

/// 序列所在的数据根目录
fn root_of(sequence: &Path) -> PathBuf {
    sequence
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn track(
    config: &PipelineConfig,
    sequence: &Path,
    tracker: TrackerKind,
    classes: Option<PathBuf>,
    render: Option<PathBuf>,
    interactive: bool,
) -> Result<()> {
    // 未指定时使用数据根目录下的类别配置 (若存在)
    let classes = classes.or_else(|| {
        let default = root_of(sequence).join(CLASSES_YAML);
        default.exists().then_some(default)
    });
    let policy = class_policy(config, classes.as_deref())?;

    let outcome = match render {
        Some(dir) => {
            let overlay = Overlay::new(config.font_path.as_deref())?;
            let mut sink: Box<dyn ReviewSink> = if interactive {
                Box::new(ConsoleReview::new(dir, std::io::stdin().lock()))
            } else {
                Box::new(DirectoryReview::new(dir))
            };
            let review = Review {
                overlay: &overlay,
                sink: sink.as_mut(),
            };
            run_track(sequence, config, &policy, tracker, Some(review))?
        }
        None => run_track(sequence, config, &policy, tracker, None)?,
    };

    match outcome {
        TrackOutcome::Completed(cameras) => {
            info!("✅ tracked {} cameras", cameras.len());
        }
        TrackOutcome::Interrupted(cameras) => {
            warn!("🛑 interrupted after {} cameras", cameras.len());
        }
    }
    Ok(())
}

fn regions(
    frame_path: &Path,
    rects: &[(i32, i32, i32, i32)],
    out: &Path,
    format: RegionFormat,
    preview: Option<&Path>,
) -> Result<()> {
    let frame = image::open(frame_path)
        .with_context(|| format!("opening {}", frame_path.display()))?
        .to_rgb8();
    let mut session = RegionSession::new(frame);

    for &(x0, y0, x1, y1) in rects {
        session.press(x0, y0);
        if let Some(region) = session.release(x1, y1) {
            info!("🎯 region {:?}", region);
        }
    }
    if session.regions().is_empty() {
        bail!("no regions given");
    }
    warn_outside(session.regions(), session.canvas().dimensions());

    session.save(out, format)?;
    if let Some(path) = preview {
        session
            .canvas()
            .save(path)
            .with_context(|| format!("saving preview {}", path.display()))?;
    }
    Ok(())
}

fn warn_outside(regions: &[ExclusionRegion], (width, height): (u32, u32)) {
    for r in regions {
        if r.x_min < 0 || r.y_min < 0 || r.x_max > width as i32 || r.y_max > height as i32 {
            warn!("⚠️ region {:?} extends beyond the {}x{} frame", r, width, height);
        }
    }
}
