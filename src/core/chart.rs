//! Line chart rendering for the engagement history.
//!
//! Points are labelled 1..N by position and spread evenly across the x axis.
//! The y axis is fixed to [0, 1] with its origin at the bottom edge. Segments
//! are drawn as cubic Bézier curves whose control points follow the usual
//! spline construction with a small tension, giving a lightly smoothed line.

use crate::error::RenderError;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{
    draw_cubic_bezier_curve_mut, draw_filled_circle_mut, draw_line_segment_mut,
};
use std::io::Cursor;

/// Fixed rendering configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartStyle {
    pub width: u32,
    pub height: u32,
    pub background: Rgb<u8>,
    pub grid_color: Rgb<u8>,
    pub axis_color: Rgb<u8>,
    pub line_color: Rgb<u8>,
    /// Bézier tension, 0 draws straight segments
    pub tension: f32,
    pub point_radius: i32,
    /// Stroke thickness in pixels
    pub line_width: u32,
    /// Number of horizontal grid intervals between 0 and 1
    pub grid_steps: u32,
    pub padding: Padding,
}

/// Space between the canvas edge and the plot area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Padding {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            width: 400,
            height: 200,
            background: Rgb([255, 255, 255]),
            grid_color: Rgb([230, 230, 230]),
            axis_color: Rgb([180, 180, 180]),
            line_color: Rgb([75, 192, 192]),
            tension: 0.1,
            point_radius: 3,
            line_width: 3,
            grid_steps: 5,
            padding: Padding {
                left: 30,
                right: 10,
                top: 10,
                bottom: 20,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Point {
    x: f32,
    y: f32,
}

/// Plot area in canvas coordinates.
#[derive(Debug, Clone, Copy)]
struct Area {
    left: f32,
    right: f32,
    top: f32,
    bottom: f32,
}

impl Area {
    fn clamp(&self, p: Point) -> Point {
        Point {
            x: p.x.clamp(self.left, self.right),
            y: p.y.clamp(self.top, self.bottom),
        }
    }
}

/// Renders score series as PNG line charts.
#[derive(Debug, Clone, Default)]
pub struct ChartRenderer {
    style: ChartStyle,
}

impl ChartRenderer {
    pub fn new(style: ChartStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &ChartStyle {
        &self.style
    }

    /// Render a series to PNG bytes.
    pub fn render(&self, series: &[f64]) -> Result<Vec<u8>, RenderError> {
        let img = self.render_image(series);
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| RenderError::Encode(e.to_string()))?;
        Ok(buf.into_inner())
    }

    /// Render a series to an in-memory image.
    pub fn render_image(&self, series: &[f64]) -> RgbImage {
        let style = &self.style;
        let mut img = ImageBuffer::from_pixel(style.width, style.height, style.background);
        let area = self.plot_area();

        self.draw_grid(&mut img, area);

        let points = self.project(series, area);
        if points.len() > 1 {
            self.draw_line(&mut img, &points, area);
        }
        for p in &points {
            draw_filled_circle_mut(
                &mut img,
                (p.x.round() as i32, p.y.round() as i32),
                style.point_radius,
                style.line_color,
            );
        }

        img
    }

    fn plot_area(&self) -> Area {
        let style = &self.style;
        let pad = style.padding;
        let right = style.width.saturating_sub(pad.right + 1).max(pad.left);
        let bottom = style.height.saturating_sub(pad.bottom + 1).max(pad.top);
        Area {
            left: pad.left as f32,
            right: right as f32,
            top: pad.top as f32,
            bottom: bottom as f32,
        }
    }

    fn draw_grid(&self, img: &mut RgbImage, area: Area) {
        let style = &self.style;
        let steps = style.grid_steps.max(1);
        for i in 0..=steps {
            let y = area.bottom - (area.bottom - area.top) * i as f32 / steps as f32;
            let color = if i == 0 {
                style.axis_color
            } else {
                style.grid_color
            };
            draw_line_segment_mut(img, (area.left, y), (area.right, y), color);
        }
        draw_line_segment_mut(
            img,
            (area.left, area.top),
            (area.left, area.bottom),
            style.axis_color,
        );
    }

    /// Map series values to canvas points. Values are clamped to [0, 1].
    fn project(&self, series: &[f64], area: Area) -> Vec<Point> {
        let n = series.len();
        let width = area.right - area.left;
        let height = area.bottom - area.top;

        series
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let x = if n > 1 {
                    area.left + width * i as f32 / (n - 1) as f32
                } else {
                    area.left + width / 2.0
                };
                let v = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
                Point {
                    x,
                    y: area.bottom - height * v as f32,
                }
            })
            .collect()
    }

    fn draw_line(&self, img: &mut RgbImage, points: &[Point], area: Area) {
        let style = &self.style;
        let controls = control_points(points, style.tension, area);

        let half = style.line_width as f32 / 2.0;
        let offsets: Vec<f32> = (0..style.line_width.max(1))
            .map(|i| i as f32 - half + 0.5)
            .collect();

        for i in 0..points.len() - 1 {
            let (start, end) = (points[i], points[i + 1]);
            let (_, cp_a) = controls[i];
            let (cp_b, _) = controls[i + 1];

            for &dy in &offsets {
                if style.tension == 0.0 {
                    draw_line_segment_mut(
                        img,
                        (start.x, start.y + dy),
                        (end.x, end.y + dy),
                        style.line_color,
                    );
                } else {
                    draw_cubic_bezier_curve_mut(
                        img,
                        (start.x, start.y + dy),
                        (end.x, end.y + dy),
                        (cp_a.x, cp_a.y + dy),
                        (cp_b.x, cp_b.y + dy),
                        style.line_color,
                    );
                }
            }
        }
    }
}

/// Previous/next Bézier control points for every point in the line.
///
/// Endpoints use themselves as the missing neighbour. Control points are
/// kept inside the plot area so the curve never overshoots the axes.
fn control_points(points: &[Point], tension: f32, area: Area) -> Vec<(Point, Point)> {
    (0..points.len())
        .map(|i| {
            let current = points[i];
            let previous = if i == 0 { current } else { points[i - 1] };
            let next = points.get(i + 1).copied().unwrap_or(current);

            let d01 = distance(previous, current);
            let d12 = distance(current, next);
            let total = d01 + d12;
            let (s01, s12) = if total > 0.0 {
                (d01 / total, d12 / total)
            } else {
                (0.0, 0.0)
            };

            let fa = tension * s01;
            let fb = tension * s12;
            let dx = next.x - previous.x;
            let dy = next.y - previous.y;

            let cp_prev = Point {
                x: current.x - fa * dx,
                y: current.y - fa * dy,
            };
            let cp_next = Point {
                x: current.x + fb * dx,
                y: current.y + fb * dy,
            };
            (area.clamp(cp_prev), area.clamp(cp_next))
        })
        .collect()
}

fn distance(a: Point, b: Point) -> f32 {
    ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt()
}
