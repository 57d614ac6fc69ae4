//! Native GeoTIFF reading/writing with the `tiff` crate
//!
//! Multi-band rasters come in two layouts: one page per band, or one page
//! with interleaved samples. [`read_geotiff`] accepts either and picks the
//! requested (1-based) band.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

// The decoder maps known tag numbers onto their named variants, so lookups
// through `Tag::Unknown(33550)` and friends never match.
const MODEL_PIXEL_SCALE: Tag = Tag::ModelPixelScaleTag;
const MODEL_TIEPOINT: Tag = Tag::ModelTiepointTag;
const GEO_KEY_DIRECTORY: Tag = Tag::GeoKeyDirectoryTag;
const GDAL_NODATA: Tag = Tag::GdalNodata;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

/// Options for writing GeoTIFF files
#[derive(Debug, Clone, Default)]
pub struct GeoTiffOptions {
    /// Overrides the raster's own no-data value
    pub nodata: Option<f64>,
}

fn tiff_err(what: &str) -> impl Fn(tiff::TiffError) -> Error + '_ {
    move |e| Error::Other(format!("{what}: {e}"))
}

/// Read one band of a GeoTIFF file. `band` is 1-based and defaults to 1.
pub fn read_geotiff<T, P>(path: P, band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    decode_geotiff(file, band.unwrap_or(1))
}

/// Read one band of a GeoTIFF held in memory
pub fn read_geotiff_from_buffer<T>(data: &[u8], band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
{
    decode_geotiff(Cursor::new(data), band.unwrap_or(1))
}

/// Number of bands, counting pages and interleaved samples
pub fn band_count<P: AsRef<Path>>(path: P) -> Result<usize> {
    let mut decoder = Decoder::new(File::open(path.as_ref())?).map_err(tiff_err("TIFF decode error"))?;
    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image().map_err(tiff_err("Cannot read next page"))?;
        pages += 1;
    }
    if pages > 1 {
        return Ok(pages);
    }
    let samples = decoder
        .get_tag_u32(Tag::SamplesPerPixel)
        .map(|s| s as usize)
        .unwrap_or(1);
    Ok(samples.max(1))
}

/// Read every band of a multi-band GeoTIFF
pub fn read_all_bands<T, P>(path: P) -> Result<Vec<Raster<T>>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let count = band_count(path.as_ref())?;
    (1..=count).map(|band| read_geotiff(path.as_ref(), Some(band))).collect()
}

fn to_f64(result: DecodingResult) -> Result<Vec<f64>> {
    macro_rules! widen {
        ($buf:expr) => {
            $buf.into_iter().map(|v| v as f64).collect()
        };
    }
    Ok(match result {
        DecodingResult::F32(buf) => widen!(buf),
        DecodingResult::F64(buf) => buf,
        DecodingResult::U8(buf) => widen!(buf),
        DecodingResult::U16(buf) => widen!(buf),
        DecodingResult::U32(buf) => widen!(buf),
        DecodingResult::I8(buf) => widen!(buf),
        DecodingResult::I16(buf) => widen!(buf),
        DecodingResult::I32(buf) => widen!(buf),
        _ => return Err(Error::UnsupportedDataType("Unsupported TIFF pixel format".to_string())),
    })
}

fn decode_geotiff<T, R>(reader: R, band: usize) -> Result<Raster<T>>
where
    T: RasterElement,
    R: Read + Seek,
{
    if band == 0 {
        return Err(Error::InvalidParameter {
            name: "band",
            value: "0".into(),
            reason: "bands are numbered from 1".into(),
        });
    }
    let mut decoder = Decoder::new(reader).map_err(tiff_err("TIFF decode error"))?;

    let mut page = 1;
    while page < band && decoder.more_images() {
        decoder.next_image().map_err(tiff_err("Cannot read next page"))?;
        page += 1;
    }
    // the requested band is a sample within the current page when pages ran out
    let sample = band - page;

    let (width, height) = decoder
        .dimensions()
        .map_err(tiff_err("Cannot read dimensions"))?;
    let (rows, cols) = (height as usize, width as usize);
    let nodata = read_nodata(&mut decoder);
    let transform = read_geotransform(&mut decoder).ok();
    let epsg = read_epsg(&mut decoder);
    let values = to_f64(decoder.read_image().map_err(tiff_err("Cannot read image data"))?)?;

    let cells = rows * cols;
    if cells == 0 || values.len() % cells != 0 {
        return Err(Error::InvalidDimensions { width: cols, height: rows });
    }
    let samples = values.len() / cells;
    if sample >= samples {
        return Err(Error::InvalidParameter {
            name: "band",
            value: band.to_string(),
            reason: format!("raster has {} band(s)", page - 1 + samples),
        });
    }

    let data: Vec<T> = values
        .iter()
        .skip(sample)
        .step_by(samples)
        .map(|&v| match nodata {
            Some(nd) if v == nd || (v.is_nan() && nd.is_nan()) => T::default_nodata(),
            _ => num_traits::cast(v).unwrap_or(T::default_nodata()),
        })
        .collect();

    let mut raster = Raster::from_vec(data, rows, cols)?;
    if nodata.is_some() {
        raster.set_nodata(Some(T::default_nodata()));
    }
    if let Some(transform) = transform {
        raster.set_transform(transform);
    }
    raster.set_crs(epsg.map(CRS::from_epsg));
    Ok(raster)
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    decoder
        .get_tag_ascii_string(GDAL_NODATA)
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse().ok())
}

fn read_epsg<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let keys = decoder.get_tag_u16_vec(GEO_KEY_DIRECTORY).ok()?;
    // header of 4 shorts, then (key, location, count, value) quadruples
    keys.get(4..)?
        .chunks_exact(4)
        .find(|k| k[0] == PROJECTED_CS_TYPE_KEY && k[1] == 0)
        .map(|k| u32::from(k[3]))
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(MODEL_PIXEL_SCALE)
        .map_err(|_| Error::Other("No pixel scale tag".into()))?;
    let tiepoint = decoder
        .get_tag_f64_vec(MODEL_TIEPOINT)
        .map_err(|_| Error::Other("No tiepoint tag".into()))?;

    if scale.len() >= 2 && tiepoint.len() >= 6 {
        // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
        let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
        let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
        return Ok(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]));
    }
    Err(Error::Other("Cannot determine geotransform".into()))
}

/// Write a single-band raster as a 32-bit float GeoTIFF
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P, options: Option<GeoTiffOptions>) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    encode_geotiff(raster, file, options.unwrap_or_default())
}

/// Write a raster to an in-memory GeoTIFF buffer
pub fn write_geotiff_to_buffer<T>(raster: &Raster<T>, options: Option<GeoTiffOptions>) -> Result<Vec<u8>>
where
    T: RasterElement,
{
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf), options.unwrap_or_default())?;
    Ok(buf)
}

fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W, options: GeoTiffOptions) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
{
    let mut encoder = TiffEncoder::new(writer).map_err(tiff_err("TIFF encoder error"))?;
    let (rows, cols) = raster.shape();
    let nodata = options
        .nodata
        .or_else(|| raster.nodata().and_then(|nd| nd.to_f64()));

    let data: Vec<f32> = raster
        .data()
        .iter()
        .map(|&v| {
            if raster.is_nodata(v) {
                nodata.map_or(f32::NAN, |nd| nd as f32)
            } else {
                num_traits::cast(v).unwrap_or(f32::NAN)
            }
        })
        .collect();

    let mut image = encoder
        .new_image::<Gray32Float>(cols as u32, rows as u32)
        .map_err(tiff_err("Cannot create TIFF image"))?;

    let gt = raster.transform();
    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(MODEL_PIXEL_SCALE, &scale[..])
        .map_err(tiff_err("Cannot write scale tag"))?;
    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    image
        .encoder()
        .write_tag(MODEL_TIEPOINT, &tiepoint[..])
        .map_err(tiff_err("Cannot write tiepoint tag"))?;

    // GTModelType = projected, GTRasterType = pixel-is-area, projected CS
    let epsg = raster.crs().and_then(|c| c.epsg()).unwrap_or(crate::crs::RD_NEW_EPSG);
    let geokeys: Vec<u16> = vec![
        1, 1, 0, 3,
        1024, 0, 1, 1,
        1025, 0, 1, 1,
        PROJECTED_CS_TYPE_KEY, 0, 1, epsg as u16,
    ];
    image
        .encoder()
        .write_tag(GEO_KEY_DIRECTORY, geokeys.as_slice())
        .map_err(tiff_err("Cannot write geokey tag"))?;

    if let Some(nd) = nodata {
        image
            .encoder()
            .write_tag(GDAL_NODATA, nd.to_string().as_str())
            .map_err(tiff_err("Cannot write nodata tag"))?;
    }

    image
        .write_data(&data)
        .map_err(tiff_err("Cannot write image data"))?;
    Ok(())
}
