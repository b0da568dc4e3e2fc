//! ASCII plotting for terminal output.
//!
//! Fixed-size character grid, deterministic output. Curves are drawn first
//! with their own character; point series overlay them.
//!
//! - DAS plot: one curve per component, legend below the grid
//! - fit plot: fit targets `σ_i · rSV_i` as points (`o`), the model as `-`

use crate::domain::{Das, FitResult};

const CURVE_CHARS: [char; 6] = ['*', '+', 'x', '#', '%', '@'];

/// One series on the grid.
#[derive(Debug, Clone)]
pub struct Series {
    pub label: String,
    pub ch: char,
    pub points: Vec<(f64, f64)>,
    /// Draw as a connected line rather than isolated points.
    pub connected: bool,
}

/// Plot every DAS column against wavelength.
pub fn render_das_plot(das: &Das, width: usize, height: usize) -> String {
    let series: Vec<Series> = das
        .spectra
        .column_iter()
        .enumerate()
        .map(|(j, col)| Series {
            label: das.label(j),
            ch: CURVE_CHARS[j % CURVE_CHARS.len()],
            points: das.wavelengths.iter().copied().zip(col.iter().copied()).collect(),
            connected: true,
        })
        .collect();
    render_plot("DAS vs wavelength", "wavelength", &series, width, height)
}

/// Plot the fit target and the fitted model for each retained rSV.
pub fn render_fit_plot(result: &FitResult, width: usize, height: usize) -> String {
    let mut out = String::new();
    for (j, component) in result.components.iter().enumerate() {
        let series = [
            Series {
                label: "model".to_string(),
                ch: '-',
                points: zip_column(&result.time_delays, result.best_fit.column(j).iter()),
                connected: true,
            },
            Series {
                label: format!("sigma_{component} * rSV_{component}"),
                ch: 'o',
                points: zip_column(&result.time_delays, result.targets.column(j).iter()),
                connected: false,
            },
        ];
        out.push_str(&render_plot(
            &format!("rSV{component} fit"),
            "time delay",
            &series,
            width,
            height,
        ));
    }
    out
}

/// Render `series` on a shared grid with a range header and a legend.
pub fn render_plot(title: &str, x_label: &str, series: &[Series], width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let (x_min, x_max) = range(series.iter().flat_map(|s| s.points.iter().map(|p| p.0))).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = range(series.iter().flat_map(|s| s.points.iter().map(|p| p.1))).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Zero line, when it is in range.
    if y_min < 0.0 && y_max > 0.0 {
        let y0 = map_y(0.0, y_min, y_max, height);
        for cell in grid[y0].iter_mut() {
            *cell = '.';
        }
    }

    for s in series.iter().filter(|s| s.connected) {
        draw_curve(&mut grid, &s.points, s.ch, (x_min, x_max), (y_min, y_max));
    }
    for s in series.iter().filter(|s| !s.connected) {
        for &(x, y) in &s.points {
            let col = map_x(x, x_min, x_max, width);
            let row = map_y(y, y_min, y_max, height);
            grid[row][col] = s.ch;
        }
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{title}: {x_label}=[{x_min:.3}, {x_max:.3}] | y=[{y_min:.3e}, {y_max:.3e}]\n"
    ));
    for row in grid {
        out.push_str(row.into_iter().collect::<String>().trim_end());
        out.push('\n');
    }
    for s in series {
        out.push_str(&format!("  {} {}\n", s.ch, s.label));
    }
    out
}

fn zip_column<'a>(x: &[f64], y: impl Iterator<Item = &'a f64>) -> Vec<(f64, f64)> {
    x.iter().copied().zip(y.copied()).collect()
}

fn range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values.filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
    }
    if min.is_finite() && max.is_finite() && max > min {
        Some((min, max))
    } else if min.is_finite() {
        Some((min - 0.5, min + 0.5))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(x: f64, x_min: f64, x_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((x - x_min) / (x_max - x_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], ch: char, xr: (f64, f64), yr: (f64, f64)) {
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(x, y) in curve.iter().filter(|(x, y)| x.is_finite() && y.is_finite()) {
        let col = map_x(x, xr.0, xr.1, width);
        let row = map_y(y, yr.0, yr.1, height);
        match prev {
            Some((c0, r0)) => draw_line(grid, c0, r0, col, row, ch),
            None => grid[row][col] = ch,
        }
        prev = Some((col, row));
    }
}

/// Integer line drawing (Bresenham-ish). Overwrites blanks and the zero line only.
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0 && (y0 as usize) < grid.len() && x0 >= 0 && (x0 as usize) < grid[0].len() {
            let cell = &mut grid[y0 as usize][x0 as usize];
            if *cell == ' ' || *cell == '.' {
                *cell = ch;
            }
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StdErr;
    use nalgebra::DMatrix;

    #[test]
    fn plot_golden_snapshot_small() {
        let series = [
            Series {
                label: "line".to_string(),
                ch: '-',
                points: vec![(0.0, 0.0), (9.0, 0.0)],
                connected: true,
            },
            Series {
                label: "pts".to_string(),
                ch: 'o',
                points: vec![(0.0, 1.0), (9.0, 0.0)],
                connected: false,
            },
        ];
        let txt = render_plot("t", "x", &series, 10, 5);
        let expected = concat!(
            "t: x=[0.000, 9.000] | y=[-5.000e-2, 1.050e0]\n",
            "o\n",
            "\n",
            "\n",
            "\n",
            "---------o\n",
            "  - line\n",
            "  o pts\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn das_plot_has_a_legend_entry_per_component() {
        let das = Das {
            wavelengths: vec![500.0, 510.0, 520.0, 530.0],
            components: vec![0, 1],
            spectra: DMatrix::from_row_slice(4, 2, &[0.0, -1.0, 1.0, -0.5, 0.5, 0.0, 0.0, 0.2]),
            decay_constants: vec![3.0, 30.0],
            stderrs: vec![StdErr::Unsupported, StdErr::Estimated(1.0)],
        };
        let txt = render_das_plot(&das, 40, 10);
        assert!(txt.contains("  * DAS_comp0, tau = 3.00 ± not computed"));
        assert!(txt.contains("  + DAS_comp1, tau = 30.00 ± 1.00"));
        assert_eq!(txt.lines().count(), 1 + 10 + 2);
        assert!(txt.contains('.'));
    }
}
