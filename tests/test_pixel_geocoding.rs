use approx::assert_abs_diff_eq;
use geocore::core::{calculate_tile_count, GeoRasters};
use geocore::{
    Band, EstimatorParams, GeoCoding, GeoPos, PixelGeoCoding, PixelGeoCodingParams, PixelPos, PixelPosEstimator,
    PixelRegion, Raster, Scene, Stepping,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Swath descending from 40°N at `resolution` degrees per pixel.
fn swath(width: usize, height: usize, resolution: f64) -> (Band, Band) {
    let lon = Band::from_fn("lon", width, height, |x, y| -60.0 + resolution * x as f64 + 0.0002 * y as f64);
    let lat = Band::from_fn("lat", width, height, |_, y| 40.0 - resolution * y as f64);
    (lon, lat)
}

/// Gently curved swath with a rotated pixel grid, crossing the antimeridian.
fn curved_scene(width: usize, height: usize) -> Scene {
    let mut scene = Scene::new(width as i32, height as i32);
    scene
        .add_band(Band::from_fn("lat", width, height, |x, y| {
            let (x, y) = (x as f64, y as f64);
            -10.0 + 0.01 * y - 0.003 * x + 1e-6 * x * x
        }))
        .expect("lat band");
    scene
        .add_band(Band::from_fn("lon", width, height, |x, y| {
            let (x, y) = (x as f64, y as f64);
            GeoPos::normalize_lon(179.0 + 0.012 * x + 0.002 * y + 2e-6 * y * y)
        }))
        .expect("lon band");
    scene
}

#[test]
fn test_stepping_for_square_region() {
    let stepping = Stepping::compute(&PixelRegion::new(0, 0, 512, 512), 1000);
    assert_eq!((stepping.min_x, stepping.min_y), (0, 0));
    assert_eq!((stepping.max_x, stepping.max_y), (511, 511));
    assert_eq!((stepping.point_count_x, stepping.point_count_y), (32, 32));
    assert_eq!((stepping.step_x, stepping.step_y), (17, 17));
}

#[test]
fn test_tile_count_for_long_swath() {
    init_logging();
    let (lon, lat) = swath(500, 4000, 0.01);
    let rasters = GeoRasters::new(&lon, &lat);
    assert_eq!(calculate_tile_count(&rasters, 10.0), 4);

    let mut previous = 0;
    for &accuracy in &[40.0, 20.0, 10.0, 5.0, 2.0, 1.0] {
        let count = calculate_tile_count(&rasters, accuracy);
        println!("accuracy {}° -> {} tiles", accuracy, count);
        assert!(count >= previous, "{}° gave {} tiles after {}", accuracy, count, previous);
        previous = count;
    }
}

#[test]
fn test_estimator_within_half_pixel() {
    init_logging();
    let scene = curved_scene(200, 300);
    let lon = scene.band("lon").expect("lon band");
    let lat = scene.band("lat").expect("lat band");
    let rasters = GeoRasters::new(&*lon, &*lat);
    let estimator = PixelPosEstimator::new(&rasters, &EstimatorParams::default()).expect("estimator");
    assert!(estimator.can_get_pixel_pos());

    for y in (0..300).step_by(37) {
        for x in (0..200).step_by(23) {
            let geo = GeoPos::new(lat.sample(x, y), lon.sample(x, y));
            let pos = estimator.get_pixel_pos(&geo);
            assert!(pos.is_valid(), "no estimate for ({}, {})", x, y);
            assert!((pos.x - (x as f64 + 0.5)).abs() < 0.5, "x {} -> {}", x, pos.x);
            assert!((pos.y - (y as f64 + 0.5)).abs() < 0.5, "y {} -> {}", y, pos.y);
        }
    }
}

#[test]
fn test_pixel_geo_coding_round_trip() {
    init_logging();
    let mut scene = curved_scene(200, 300);
    let gc = PixelGeoCoding::new(&scene, "lat", "lon", None, PixelGeoCodingParams::default()).expect("geocoding");
    assert!(gc.is_crossing_meridian_at_180());
    scene.set_geo_coding(GeoCoding::Pixel(gc));
    let gc = scene.geo_coding().expect("geocoding");

    for &(x, y) in &[(0.5, 0.5), (100.5, 150.5), (199.5, 299.5), (120.5, 20.5), (30.5, 260.5)] {
        let geo = gc.get_geo_pos(&PixelPos::new(x, y));
        assert!(geo.is_valid());
        let pixel = gc.get_pixel_pos(&geo);
        assert_abs_diff_eq!(pixel.x, x, epsilon = 1e-9);
        assert_abs_diff_eq!(pixel.y, y, epsilon = 1e-9);
    }

    // somewhere else on the globe
    assert!(!gc.get_pixel_pos(&GeoPos::new(50.0, 10.0)).is_valid());
}

#[test]
fn test_params_from_json() {
    let params: PixelGeoCodingParams =
        serde_json::from_str(r#"{"search_radius": 3, "estimator": {"max_rmse_px": 0.25}}"#).expect("params");
    assert_eq!(params.search_radius, 3);
    assert!(!params.fraction_accuracy);
    assert_eq!(params.estimator.max_rmse_px, 0.25);
    assert_eq!(params.estimator.numerator_degree, 3);

    let json = serde_json::to_string(&PixelGeoCodingParams::default()).expect("json");
    let back: PixelGeoCodingParams = serde_json::from_str(&json).expect("params");
    assert_eq!(back, PixelGeoCodingParams::default());
}

#[test]
fn test_geo_codings_are_shareable_between_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<GeoCoding>();
    assert_send_sync::<Scene>();
    assert_send_sync::<PixelPosEstimator>();
}
