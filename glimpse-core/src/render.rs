use camino::{Utf8Path, Utf8PathBuf};
use image::{
    imageops::{self, FilterType},
    Rgb, RgbImage,
};
use imageproc::{drawing, rect::Rect};
use log::debug;

use crate::summarize::query::{Summary, SummaryFrame};

/// Errors that can occur while writing a summary to disk.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Error writing summary rows to {path}")]
    Csv { path: Utf8PathBuf, #[source] source: csv::Error },
    #[error("Error flushing summary rows to {path}")]
    Io { path: Utf8PathBuf, #[source] source: std::io::Error },
    #[error("Error encoding the image to {path}")]
    Encode { path: Utf8PathBuf, #[source] source: image::ImageError },
}

/// Writes one `timestamp,similarity` row per summary result, header first.
///
/// An empty summary writes nothing and leaves no file behind.
pub fn write_csv(summary: &Summary, path: &Utf8Path) -> Result<(), RenderError> {
    if summary.is_empty() {
        debug!("Nothing to write to {path}: the summary is empty");
        return Ok(());
    }

    let mut writer = csv::Writer::from_path(path.as_std_path())
        .map_err(|e| RenderError::Csv { path: path.to_owned(), source: e })?;

    writer
        .write_record(["timestamp", "similarity"])
        .map_err(|e| RenderError::Csv { path: path.to_owned(), source: e })?;
    for frame in summary.iter() {
        writer
            .write_record([frame.timestamp.to_string(), frame.similarity.to_string()])
            .map_err(|e| RenderError::Csv { path: path.to_owned(), source: e })?;
    }
    writer
        .flush()
        .map_err(|e| RenderError::Io { path: path.to_owned(), source: e })
}

/// Renders the summary as a single row of frame tiles, each with a
/// similarity bar underneath. Results whose frame could not be decoded get a
/// crossed-out placeholder tile.
///
/// An empty summary writes nothing and leaves no file behind.
pub fn render_contact_sheet(summary: &Summary, path: &Utf8Path) -> Result<(), RenderError> {
    if summary.is_empty() {
        debug!("Nothing to render to {path}: the summary is empty");
        return Ok(());
    }

    let tiles = summary.len() as u32;
    let width = tiles * TILE_WIDTH + (tiles + 1) * PADDING;
    let height = TILE_HEIGHT + BAR_HEIGHT + 3 * PADDING;
    let mut sheet = RgbImage::from_pixel(width, height, BACKGROUND);

    for (i, frame) in summary.iter().enumerate() {
        let x = PADDING + i as u32 * (TILE_WIDTH + PADDING);
        draw_tile(&mut sheet, x, PADDING, frame);
    }

    sheet
        .save(path)
        .map_err(|e| RenderError::Encode { path: path.to_owned(), source: e })?;
    debug!("Wrote a {tiles} tile contact sheet to {path}");
    Ok(())
}

/// Renders the summary as an event timeline: one stem per result, placed by
/// timestamp along the horizontal axis and scaled by similarity.
///
/// `duration` is the length of the video in seconds and fixes the axis
/// scale; timestamps past it are pinned to the right edge. An empty summary
/// writes nothing and leaves no file behind.
pub fn render_timeline(
    summary: &Summary,
    duration: f64,
    path: &Utf8Path,
) -> Result<(), RenderError> {
    if summary.is_empty() {
        debug!("Nothing to render to {path}: the summary is empty");
        return Ok(());
    }

    let mut plot = RgbImage::from_pixel(TIMELINE_WIDTH, TIMELINE_HEIGHT, BACKGROUND);
    let track_width = TIMELINE_WIDTH - 2 * PLOT_MARGIN;
    let baseline = (TIMELINE_HEIGHT - PLOT_MARGIN) as f32;

    drawing::draw_line_segment_mut(
        &mut plot,
        (PLOT_MARGIN as f32, baseline),
        ((TIMELINE_WIDTH - PLOT_MARGIN) as f32, baseline),
        BAR_TRACK,
    );

    let stem_max = baseline - PLOT_MARGIN as f32;
    for frame in summary.iter() {
        let x = (PLOT_MARGIN + timeline_x(frame.timestamp, duration, track_width)) as f32;
        let top = baseline - frame.similarity.clamp(0.0, 1.0) * stem_max;
        drawing::draw_line_segment_mut(&mut plot, (x, baseline), (x, top), BAR_FILL);
        drawing::draw_filled_circle_mut(&mut plot, (x as i32, top as i32), 3, MARK);
    }

    plot.save(path)
        .map_err(|e| RenderError::Encode { path: path.to_owned(), source: e })?;
    debug!("Wrote a timeline of {} results to {path}", summary.len());
    Ok(())
}

// Private variables and functions

const TILE_WIDTH: u32 = 240;
const TILE_HEIGHT: u32 = 135;
const BAR_HEIGHT: u32 = 6;
const PADDING: u32 = 8;

const TIMELINE_WIDTH: u32 = 800;
const TIMELINE_HEIGHT: u32 = 160;
const PLOT_MARGIN: u32 = 16;

const BACKGROUND: Rgb<u8> = Rgb([24, 24, 24]);
const PLACEHOLDER: Rgb<u8> = Rgb([64, 64, 64]);
const BAR_TRACK: Rgb<u8> = Rgb([48, 48, 48]);
const BAR_FILL: Rgb<u8> = Rgb([66, 160, 245]);
const MARK: Rgb<u8> = Rgb([220, 220, 220]);

fn draw_tile(sheet: &mut RgbImage, x: u32, y: u32, frame: &SummaryFrame) {
    match &frame.image {
        Some(image) => {
            let tile = imageops::resize(image, TILE_WIDTH, TILE_HEIGHT, FilterType::Triangle);
            imageops::replace(sheet, &tile, x as i64, y as i64);
        }
        None => {
            drawing::draw_filled_rect_mut(
                sheet,
                Rect::at(x as i32, y as i32).of_size(TILE_WIDTH, TILE_HEIGHT),
                PLACEHOLDER,
            );
            // no pixels for this result, cross the tile out
            let (left, right) = (x as f32, (x + TILE_WIDTH) as f32);
            let (top, bottom) = (y as f32, (y + TILE_HEIGHT) as f32);
            drawing::draw_line_segment_mut(sheet, (left, top), (right, bottom), MARK);
            drawing::draw_line_segment_mut(sheet, (left, bottom), (right, top), MARK);
        }
    }

    let bar_y = y + TILE_HEIGHT + PADDING;
    drawing::draw_filled_rect_mut(
        sheet,
        Rect::at(x as i32, bar_y as i32).of_size(TILE_WIDTH, BAR_HEIGHT),
        BAR_TRACK,
    );
    let fill = bar_width(frame.similarity, TILE_WIDTH);
    if fill > 0 {
        drawing::draw_filled_rect_mut(
            sheet,
            Rect::at(x as i32, bar_y as i32).of_size(fill, BAR_HEIGHT),
            BAR_FILL,
        );
    }
}

/// Horizontal offset of a timestamp within the timeline track.
fn timeline_x(timestamp: f64, duration: f64, track_width: u32) -> u32 {
    if duration <= 0.0 {
        return 0;
    }
    let fraction = (timestamp / duration).clamp(0.0, 1.0);
    (fraction * track_width as f64).round() as u32
}

/// Filled width of a similarity bar, clamping scores outside [0, 1].
fn bar_width(similarity: f32, track_width: u32) -> u32 {
    (similarity.clamp(0.0, 1.0) * track_width as f32).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(frames: Vec<SummaryFrame>) -> Summary {
        Summary::with(Utf8PathBuf::from("/videos/demo.mp4"), frames)
    }

    fn frame(timestamp: f64, similarity: f32, with_image: bool) -> SummaryFrame {
        SummaryFrame {
            timestamp,
            similarity,
            image: with_image.then(|| RgbImage::from_pixel(64, 36, Rgb([200, 30, 30]))),
        }
    }

    fn temp_path(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).expect("temp paths should be utf-8")
    }

    #[test]
    fn csv_rows_match_the_summary() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = temp_path(&dir, "summary.csv");

        let summary = summary(vec![frame(1.5, 0.9, true), frame(4.0, 0.35, false)]);
        write_csv(&summary, &path).expect("csv should write");

        let written = std::fs::read_to_string(&path).expect("csv should read back");
        assert_eq!(written, "timestamp,similarity\n1.5,0.9\n4,0.35\n");
    }

    #[test]
    fn empty_summaries_leave_no_files_behind() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let empty = summary(vec![]);

        write_csv(&empty, &temp_path(&dir, "summary.csv")).expect("empty csv should be a no-op");
        render_contact_sheet(&empty, &temp_path(&dir, "sheet.png"))
            .expect("empty sheet should be a no-op");
        render_timeline(&empty, 10.0, &temp_path(&dir, "timeline.png"))
            .expect("empty timeline should be a no-op");

        let entries = std::fs::read_dir(dir.path()).expect("tempdir should list");
        assert_eq!(entries.count(), 0);
    }

    #[test]
    fn contact_sheet_tiles_every_result() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = temp_path(&dir, "sheet.png");
        let summary = summary(vec![
            frame(0.0, 1.0, true),
            frame(3.0, 0.5, false),
            frame(9.0, 0.0, true),
        ]);

        render_contact_sheet(&summary, &path).expect("sheet should render");

        let sheet = image::open(path.as_std_path()).expect("sheet should read back").to_rgb8();
        assert_eq!(sheet.width(), 3 * TILE_WIDTH + 4 * PADDING);
        assert_eq!(sheet.height(), TILE_HEIGHT + BAR_HEIGHT + 3 * PADDING);

        // Second tile has no frame: off the cross diagonals it shows the
        // placeholder color, while the first tile shows resized frame pixels
        let tile_x = |i: u32| PADDING + i * (TILE_WIDTH + PADDING);
        let offset = (TILE_WIDTH / 4, TILE_HEIGHT / 2);
        assert_eq!(*sheet.get_pixel(tile_x(0) + offset.0, PADDING + offset.1), Rgb([200, 30, 30]));
        assert_eq!(*sheet.get_pixel(tile_x(1) + offset.0, PADDING + offset.1), PLACEHOLDER);
    }

    #[test]
    fn timeline_renders_at_fixed_dimensions() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = temp_path(&dir, "timeline.png");
        let summary = summary(vec![frame(2.0, 0.8, true), frame(7.5, 0.2, false)]);

        render_timeline(&summary, 10.0, &path).expect("timeline should render");

        let plot = image::open(path.as_std_path()).expect("plot should read back");
        assert_eq!(plot.width(), TIMELINE_WIDTH);
        assert_eq!(plot.height(), TIMELINE_HEIGHT);
    }

    #[test]
    fn timeline_marks_stay_on_the_track() {
        assert_eq!(timeline_x(0.0, 10.0, 700), 0);
        assert_eq!(timeline_x(5.0, 10.0, 700), 350);
        assert_eq!(timeline_x(10.0, 10.0, 700), 700);
        // Timestamps past the known duration pin to the right edge
        assert_eq!(timeline_x(25.0, 10.0, 700), 700);
        // An unknown duration pins everything to the left edge
        assert_eq!(timeline_x(3.0, 0.0, 700), 0);
    }

    #[test]
    fn similarity_bars_clamp_to_the_track() {
        assert_eq!(bar_width(0.5, 240), 120);
        assert_eq!(bar_width(1.0, 240), 240);
        assert_eq!(bar_width(2.0, 240), 240);
        assert_eq!(bar_width(-0.25, 240), 0);
    }
}
