//! Spectrum, peak fit and calibration plots

use crate::{Axis, Calibration, CalibrationPoint, PeakFit, PlotSettings, Scale, Spectrum};
use plotters::{
    coord::ranged1d::{AsRangedCoord, ValueFormatter},
    coord::Shift,
    prelude::*,
};
use std::{error::Error, ops::Range, path::Path};

type Result<T> = std::result::Result<T, Box<dyn Error>>;

const SIZE: (u32, u32) = (1000, 600);

struct Series {
    points: Vec<(f64, f64)>,
    color: RGBColor,
    width: u32,
    label: Option<String>,
}

fn max_value(x: &[f64]) -> f64 {
    x.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
}
fn min_value(x: &[f64]) -> f64 {
    x.iter().cloned().fold(f64::INFINITY, f64::min)
}

fn draw_chart<DB, Y>(
    root: &DrawingArea<DB, Shift>,
    x_range: Range<f64>,
    y_range: Y,
    x_desc: &str,
    series: Vec<Series>,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
    Y: AsRangedCoord<Value = f64>,
    Y::CoordDescType: ValueFormatter<f64>,
{
    let mut chart = ChartBuilder::on(root)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .margin(10)
        .build_cartesian_2d(x_range, y_range)?;
    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc("Counts")
        .draw()?;
    let mut labeled = false;
    for Series {
        points,
        color,
        width,
        label,
    } in series
    {
        let anno = chart.draw_series(LineSeries::new(points, color.stroke_width(width)))?;
        if let Some(label) = label {
            labeled = true;
            anno.label(label)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
        }
    }
    if labeled {
        chart
            .configure_series_labels()
            .border_style(&BLACK)
            .background_style(&WHITE.mix(0.8))
            .position(SeriesLabelPosition::UpperRight)
            .draw()?;
    }
    Ok(())
}

/// Removes the points that cannot be drawn on a logarithmic axis
fn drop_non_positive(series: &mut [Series]) {
    for s in series.iter_mut() {
        s.points.retain(|(_, y)| *y > 0f64);
    }
}

/// Fit overlay colors, starting with the tableau red
fn overlay_colors() -> impl Iterator<Item = RGBColor> {
    colorous::TABLEAU10
        .iter()
        .skip(3)
        .cycle()
        .map(|c| RGBColor(c.r, c.g, c.b))
}

/// Draws the series on a linear or logarithmic counts axis
fn draw_counts<P: AsRef<Path>>(
    path: P,
    x_range: Range<f64>,
    x_desc: &str,
    scale: Scale,
    mut series: Vec<Series>,
) -> Result<()> {
    if scale == Scale::Log {
        drop_non_positive(&mut series);
    }
    let y: Vec<f64> = series
        .iter()
        .flat_map(|s| s.points.iter().map(|(_, y)| *y))
        .collect();
    if y.is_empty() {
        return Err("nothing to plot".into());
    }
    let (y_min, y_max) = (min_value(&y), max_value(&y));
    let root = BitMapBackend::new(path.as_ref(), SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    match scale {
        Scale::Log => draw_chart(
            &root,
            x_range,
            (y_min * 0.5..y_max * 2f64).log_scale(),
            x_desc,
            series,
        )?,
        Scale::Linear => {
            let pad = 0.05 * (y_max - y_min).max(1f64);
            draw_chart(
                &root,
                x_range,
                (y_min - pad).min(0f64)..y_max + pad,
                x_desc,
                series,
            )?
        }
    };
    root.present()?;
    log::info!("Plot saved as {:?}", path.as_ref());
    Ok(())
}

fn spectrum_series(spectrum: &Spectrum, axis: Axis, label: Option<String>) -> Result<Series> {
    let x: Vec<f64> = match axis {
        Axis::Channel => spectrum.channels().map(|c| c as f64).collect(),
        Axis::Energy => spectrum
            .energies()
            .ok_or("the spectrum has no energy column")?
            .iter()
            .map(|e| e.value)
            .collect(),
    };
    Ok(Series {
        points: x.into_iter().zip(spectrum.counts().iter().cloned()).collect(),
        color: BLACK,
        width: 1,
        label,
    })
}

/// Plots the counts against the channels or the energies
pub fn spectrum<P: AsRef<Path>>(
    spectrum: &Spectrum,
    name: &str,
    axis: Axis,
    settings: &PlotSettings,
    path: P,
) -> Result<()> {
    let series = spectrum_series(spectrum, axis, Some(name.to_string()))?;
    draw_counts(
        path,
        0f64..settings.x_max,
        axis.label(),
        settings.scale,
        vec![series],
    )
}

/// Plots the spectrum with the fitted peaks overlaid
pub fn peak_fits<P: AsRef<Path>>(
    spectrum: &Spectrum,
    fits: &[PeakFit],
    settings: &PlotSettings,
    path: P,
) -> Result<()> {
    let mut series = vec![spectrum_series(spectrum, Axis::Channel, Some("Spectrum".into()))?];
    for (fit, color) in fits.iter().zip(overlay_colors()) {
        series.push(Series {
            points: fit.curve(),
            color,
            width: 2,
            label: Some(format!("{} ({} keV)", fit.name, fit.energy)),
        });
    }
    draw_counts(
        path,
        0f64..settings.x_max,
        Axis::Channel.label(),
        settings.scale,
        series,
    )
}

/// Plots the calibration points with their channel errors and the fitted quadratic
pub fn calibration<P: AsRef<Path>>(
    points: &[CalibrationPoint],
    calibration: &Calibration,
    path: P,
) -> Result<()> {
    let data: Vec<(f64, f64, f64)> = points.iter().filter_map(|p| p.usable()).collect();
    if data.is_empty() {
        return Err("no calibration point to plot".into());
    }
    let channels: Vec<f64> = data.iter().map(|(c, _, _)| *c).collect();
    let x_max = 1.2 * max_value(&channels);
    let curve: Vec<(f64, f64)> = (0..500)
        .map(|i| x_max * i as f64 / 499f64)
        .map(|x| (x, calibration.energy(x)))
        .collect();
    let energies: Vec<f64> = curve
        .iter()
        .map(|(_, e)| *e)
        .chain(data.iter().map(|(_, _, e)| *e))
        .collect();
    let (e_min, e_max) = (min_value(&energies), max_value(&energies));
    let pad = 0.05 * (e_max - e_min).max(1f64);

    let root = BitMapBackend::new(path.as_ref(), SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(calibration.formula(), ("sans-serif", 20))
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .margin(10)
        .build_cartesian_2d(0f64..x_max, e_min - pad..e_max + pad)?;
    chart
        .configure_mesh()
        .x_desc(Axis::Channel.label())
        .y_desc(Axis::Energy.label())
        .draw()?;

    let data_color = RGBColor(0x07, 0x49, 0x36);
    chart
        .draw_series(data.iter().map(|&(c, s, e)| {
            ErrorBar::new_horizontal(e, c - s, c, c + s, BLACK.filled(), 6)
        }))?;
    chart
        .draw_series(
            data.iter()
                .map(|&(c, _, e)| Circle::new((c, e), 3, data_color.filled())),
        )?
        .label("Data")
        .legend(move |(x, y)| Circle::new((x + 10, y), 3, data_color.filled()));
    let fit_color = RGBColor(0xAD, 0x36, 0x28);
    chart
        .draw_series(LineSeries::new(curve, fit_color.stroke_width(2)))?
        .label("Quadratic fit")
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &fit_color));
    chart
        .configure_series_labels()
        .border_style(&BLACK)
        .background_style(&WHITE.mix(0.8))
        .position(SeriesLabelPosition::LowerRight)
        .draw()?;
    root.present()?;
    log::info!("Energy calibration plot saved as {:?}", path.as_ref());
    Ok(())
}

#[cfg(all(test, feature = "plot"))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn counts() -> Spectrum {
        Spectrum::from_counts(vec![0., 4., 9., 0., 16., 25., 0., 9.])
    }

    #[test]
    fn log_axis_drops_empty_channels() {
        let mut series = vec![spectrum_series(&counts(), Axis::Channel, None).unwrap()];
        drop_non_positive(&mut series);
        assert_eq!(
            series[0].points,
            vec![(1., 4.), (2., 9.), (4., 16.), (5., 25.), (7., 9.)]
        );
    }

    #[test]
    fn empty_spectrum_on_log_axis() {
        let dir = TempDir::new().unwrap();
        let settings = PlotSettings::default();
        let zeros = Spectrum::from_counts(vec![0.; 8]);
        let path = dir.path().join("zeros.png");
        assert!(spectrum(&zeros, "zeros", Axis::Channel, &settings, &path).is_err());
    }

    #[test]
    fn energy_axis_needs_energies() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("energy.png");
        let settings = PlotSettings::default();
        assert!(spectrum(&counts(), "counts", Axis::Energy, &settings, &path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn png_is_written() {
        let dir = TempDir::new().unwrap();
        let settings = PlotSettings {
            scale: Scale::Linear,
            x_max: 8.,
        };
        let path = dir.path().join(settings.file_name("counts", "ChannelSpectre", "png"));
        spectrum(&counts(), "counts", Axis::Channel, &settings, &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"\x89PNG");
    }

    #[test]
    fn first_overlay_is_red() {
        let colors: Vec<(u8, u8, u8)> = overlay_colors()
            .take(8)
            .map(|RGBColor(r, g, b)| (r, g, b))
            .collect();
        let (r, g, b) = colors[0];
        assert!(r > g && r > b);
        assert_ne!(colors[0], colors[1]);
        // 7 colors after the first 3 of the palette
        assert_eq!(colors[0], colors[7]);
    }
}
