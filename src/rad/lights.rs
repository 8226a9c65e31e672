//! Direct light sources.
//!
//! Point lights, spotlights, the sky sun, and emissive textures all
//! reduce to "how much light lands on this point with this normal",
//! each with its own geometry and an occlusion test against the world
//! and the shadow meshes.

use glam::DVec3;

use bsp::{Bsp, Contents};

use super::{
    meshtrace::ShadowMesh,
    patch::PatchArena,
    trace::{self, TraceResult},
};

#[derive(Debug, Clone)]
pub enum LightKind {
    Point,
    Spot {
        direction: DVec3,
        /// Inner cone: full intensity inside.
        cone_cos: f64,
        /// Outer cone: falls to zero at the edge.
        cone2_cos: f64,
    },
    /// The sun. Reaches any point that can see a sky face along the
    /// reversed direction.
    Sky { direction: DVec3 },
}

#[derive(Debug, Clone)]
pub struct DirectLight {
    pub origin: DVec3,
    /// Color premultiplied by intensity.
    pub color: DVec3,
    pub style: u8,
    pub kind: LightKind,
}

fn parse_vec(s: &str) -> Vec<f64> {
    s.split_whitespace().filter_map(|v| v.parse().ok()).collect()
}

/// `"R G B I"` (or fewer components) into color * intensity.
fn parse_light_value(s: &str) -> DVec3 {
    let parts = parse_vec(s);
    match parts.len() {
        1 => DVec3::splat(parts[0]),
        3 => DVec3::new(parts[0], parts[1], parts[2]),
        4 => DVec3::new(parts[0], parts[1], parts[2]) / 255.0 * parts[3],
        _ => DVec3::ZERO,
    }
}

/// Direction from "angles" (pitch yaw roll) plus the separate "pitch"
/// override, engine convention: -90 pitch points straight down.
fn parse_direction(entity: &bsp::entities::EntityKeyValues) -> DVec3 {
    let angles = entity.get("angles").map(parse_vec).unwrap_or_default();
    let mut pitch = angles.first().copied().unwrap_or(0.0);
    let yaw = angles.get(1).copied().unwrap_or(0.0);

    if let Some(p) = entity.get("pitch").and_then(|p| p.parse::<f64>().ok()) {
        pitch = p;
    }

    let (pitch, yaw) = (pitch.to_radians(), yaw.to_radians());
    DVec3::new(
        pitch.cos() * yaw.cos(),
        pitch.cos() * yaw.sin(),
        pitch.sin(),
    )
}

pub fn parse_lights(entities: &[bsp::entities::EntityKeyValues]) -> Vec<DirectLight> {
    let mut lights = Vec::new();

    for entity in entities {
        let classname = entity.classname();
        if !classname.starts_with("light") {
            continue;
        }

        let origin = {
            let coords = entity.get("origin").map(parse_vec).unwrap_or_default();
            if coords.len() == 3 {
                DVec3::new(coords[0], coords[1], coords[2])
            } else if classname != "light_environment" {
                continue;
            } else {
                DVec3::ZERO
            }
        };

        let color = entity
            .get("_light")
            .map(parse_light_value)
            .unwrap_or(DVec3::splat(200.0));
        let style = entity
            .get("style")
            .and_then(|s| s.parse::<u8>().ok())
            .unwrap_or(0);

        let kind = match classname {
            "light_environment" => LightKind::Sky {
                direction: parse_direction(entity),
            },
            "light_spot" => {
                let cone = entity
                    .get("_cone")
                    .and_then(|c| c.parse::<f64>().ok())
                    .unwrap_or(10.0);
                let cone2 = entity
                    .get("_cone2")
                    .and_then(|c| c.parse::<f64>().ok())
                    .unwrap_or(30.0)
                    .max(cone);
                LightKind::Spot {
                    direction: parse_direction(entity),
                    cone_cos: cone.to_radians().cos(),
                    cone2_cos: cone2.to_radians().cos(),
                }
            }
            "light" => LightKind::Point,
            _ => continue,
        };

        lights.push(DirectLight {
            origin,
            color,
            style,
            kind,
        });
    }

    lights
}

/// Occlusion for a light path, against the world then the meshes.
fn path_open(bsp: &Bsp, meshes: &[ShadowMesh], from: DVec3, to: DVec3) -> bool {
    trace::is_unobstructed(bsp, from, to) && !meshes.iter().any(|m| m.blocks(from, to))
}

/// Light arriving at `point` with surface `normal` from one source.
/// `fade` scales the inverse-square falloff.
pub fn light_at(
    light: &DirectLight,
    bsp: &Bsp,
    meshes: &[ShadowMesh],
    point: DVec3,
    normal: DVec3,
    fade: f64,
) -> DVec3 {
    match &light.kind {
        LightKind::Point | LightKind::Spot { .. } => {
            let delta = light.origin - point;
            let dist_squared = delta.length_squared().max(1.0);
            let dir = delta / dist_squared.sqrt();

            let incidence = dir.dot(normal);
            if incidence <= 0.0 {
                return DVec3::ZERO;
            }

            let cone_scale = match &light.kind {
                LightKind::Spot {
                    direction,
                    cone_cos,
                    cone2_cos,
                } => {
                    let along = (-dir).dot(*direction);
                    if along >= *cone_cos {
                        1.0
                    } else if along <= *cone2_cos {
                        return DVec3::ZERO;
                    } else {
                        (along - cone2_cos) / (cone_cos - cone2_cos)
                    }
                }
                _ => 1.0,
            };

            if !path_open(bsp, meshes, point, light.origin) {
                return DVec3::ZERO;
            }

            light.color * incidence * cone_scale / (dist_squared * fade)
        }
        LightKind::Sky { direction } => {
            let incidence = (-*direction).dot(normal);
            if incidence <= 0.0 {
                return DVec3::ZERO;
            }

            // march toward the sun; the path must exit through sky
            let far = point - *direction * crate::math::BOGUS_RANGE / 2.0;
            match trace::test_line(bsp, point, far) {
                TraceResult::Open(Contents::Sky) => {
                    if meshes.iter().any(|m| m.blocks(point, far)) {
                        DVec3::ZERO
                    } else {
                        light.color * incidence
                    }
                }
                _ => DVec3::ZERO,
            }
        }
    }
}

/// Soft sky: average several jittered sun directions instead of one.
pub fn soft_sky_directions(direction: DVec3, spread_degrees: f64) -> Vec<DVec3> {
    let spread = spread_degrees.to_radians();
    let up = if direction.z.abs() < 0.9 { DVec3::Z } else { DVec3::X };
    let u = (up - direction * up.dot(direction)).normalize();
    let v = direction.cross(u);

    let mut directions = vec![direction];
    for i in 0..8 {
        let theta = i as f64 / 8.0 * std::f64::consts::TAU;
        directions
            .push((direction + (u * theta.cos() + v * theta.sin()) * spread.tan()).normalize());
    }
    directions
}

/// Seeds every patch's direct light from all sources, plus texlight
/// self-emission.
pub fn direct_lighting(
    arena: &mut PatchArena,
    lights: &[DirectLight],
    bsp: &Bsp,
    meshes: &[ShadowMesh],
    fade: f64,
    soft_sky: bool,
) {
    for patch in arena.patches.iter_mut() {
        // texlight faces emit from their own surface
        if patch.base_light != DVec3::ZERO {
            patch.direct.add(patch.emit_style, patch.base_light);
        }

        for light in lights {
            match (&light.kind, soft_sky) {
                (LightKind::Sky { direction }, true) => {
                    let directions = soft_sky_directions(*direction, 5.0);
                    let scale = 1.0 / directions.len() as f64;
                    for dir in directions {
                        let soft = DirectLight {
                            kind: LightKind::Sky { direction: dir },
                            ..light.clone()
                        };
                        let contribution =
                            light_at(&soft, bsp, meshes, patch.origin, patch.normal, fade);
                        if contribution != DVec3::ZERO {
                            patch.direct.add(light.style, contribution * scale);
                        }
                    }
                }
                _ => {
                    let contribution =
                        light_at(light, bsp, meshes, patch.origin, patch.normal, fade);
                    if contribution != DVec3::ZERO {
                        patch.direct.add(light.style, contribution);
                    }
                }
            }
        }
    }
}
