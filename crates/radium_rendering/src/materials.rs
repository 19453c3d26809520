//! Technique builders of the built-in materials.

use crate::{
    pass::PassIndex,
    registry::{DefaultTechniqueBuilder, TechniqueRegistry},
    shader::{ShaderConfiguration, ShaderConfigurationLibrary},
    technique::RenderTechnique,
};
use std::sync::Arc;

/// Materials lit in the opaque pass, with a depth-only Z-prepass and an
/// order-independent transparency pass used for transparent instances.
pub const LIT_MATERIALS: [&str; 3] = ["BlinnPhong", "Plain", "Lambertian"];

/// Material rendered in the volumetric pass only.
pub const VOLUMETRIC_MATERIAL: &str = "Volumetric";

/// Adds the shader configurations of every built-in material to the given
/// library and registers their technique builders in the given registry.
/// Returns the number of builders that were registered, which is lower than
/// the number of built-in materials if some names were taken.
pub fn register_default_material_techniques(
    registry: &mut TechniqueRegistry,
    library: &mut ShaderConfigurationLibrary,
) -> usize {
    let mut n_registered = 0;

    for material in LIT_MATERIALS {
        let builder = lit_material_builder(library, material);
        n_registered += usize::from(registry.register(material, builder));
    }

    let builder = volumetric_material_builder(library);
    n_registered += usize::from(registry.register(VOLUMETRIC_MATERIAL, builder));

    radium_log::debug!("Registered {} built-in material techniques", n_registered);

    n_registered
}

/// Removes the builders of every built-in material from the given registry.
/// Returns the number of builders that were removed.
pub fn unregister_default_material_techniques(registry: &mut TechniqueRegistry) -> usize {
    LIT_MATERIALS
        .into_iter()
        .chain([VOLUMETRIC_MATERIAL])
        .filter(|&material| registry.remove(material))
        .count()
}

fn lit_material_builder(
    library: &mut ShaderConfigurationLibrary,
    material: &str,
) -> DefaultTechniqueBuilder {
    let vertex_shader = material_shader_path(material, &format!("{material}.vert.glsl"));

    let lighting = library.create_configuration(
        material,
        &vertex_shader,
        material_shader_path(material, &format!("{material}.frag.glsl")),
    );
    let z_prepass = library.create_configuration(
        format!("Zprepass{material}"),
        &vertex_shader,
        material_shader_path(material, &format!("{material}ZPrepass.frag.glsl")),
    );
    let transparent = library.create_configuration(
        format!("LitOIT{material}"),
        &vertex_shader,
        material_shader_path(material, &format!("LitOIT{material}.frag.glsl")),
    );

    add_to_library(library, [&lighting, &z_prepass, &transparent]);

    Arc::new(move |technique: &mut RenderTechnique, is_transparent: bool| {
        technique.set_configuration(lighting.clone(), PassIndex::LIGHTING_OPAQUE);
        technique.set_configuration(z_prepass.clone(), PassIndex::Z_PREPASS);
        if is_transparent {
            technique.set_configuration(transparent.clone(), PassIndex::LIGHTING_TRANSPARENT);
        }
    })
}

fn volumetric_material_builder(library: &mut ShaderConfigurationLibrary) -> DefaultTechniqueBuilder {
    let vertex_shader = material_shader_path(VOLUMETRIC_MATERIAL, "Volumetric.vert.glsl");

    let volumetric = library.create_configuration(
        VOLUMETRIC_MATERIAL,
        &vertex_shader,
        material_shader_path(VOLUMETRIC_MATERIAL, "Volumetric.frag.glsl"),
    );
    // Composited by the renderer, not attached to any pass
    let volumetric_oit = library.create_configuration(
        "VolumetricOIT",
        &vertex_shader,
        material_shader_path(VOLUMETRIC_MATERIAL, "VolumetricOIT.frag.glsl"),
    );

    add_to_library(library, [&volumetric, &volumetric_oit]);

    Arc::new(move |technique: &mut RenderTechnique, _is_transparent: bool| {
        technique.set_configuration(volumetric.clone(), PassIndex::LIGHTING_VOLUMETRIC);
    })
}

fn material_shader_path(material: &str, file_name: &str) -> String {
    format!("Materials/{material}/{file_name}")
}

fn add_to_library<'a>(
    library: &mut ShaderConfigurationLibrary,
    configurations: impl IntoIterator<Item = &'a ShaderConfiguration>,
) {
    for configuration in configurations {
        if library.add_configuration(configuration.clone()) {
            radium_log::debug!(
                "Replaced shader configuration {} in library",
                configuration.name()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{ShaderSource, ShaderType};
    use std::path::Path;

    fn registered() -> (TechniqueRegistry, ShaderConfigurationLibrary) {
        let mut registry = TechniqueRegistry::new();
        let mut library = ShaderConfigurationLibrary::new("Shaders", "410");
        assert_eq!(
            register_default_material_techniques(&mut registry, &mut library),
            4
        );
        (registry, library)
    }

    fn build(registry: &TechniqueRegistry, material: &str, is_transparent: bool) -> RenderTechnique {
        let mut technique = RenderTechnique::new();
        (registry.get(material).unwrap())(&mut technique, is_transparent);
        technique
    }

    #[test]
    fn lit_materials_configure_opaque_and_prepass() {
        let (registry, _) = registered();

        for material in LIT_MATERIALS {
            let technique = build(&registry, material, false);
            assert_eq!(
                technique.configured_passes().iter().collect::<Vec<_>>(),
                vec![PassIndex::LIGHTING_OPAQUE, PassIndex::Z_PREPASS]
            );
            assert_eq!(
                technique
                    .configuration(PassIndex::LIGHTING_OPAQUE)
                    .unwrap()
                    .name(),
                material
            );
            assert_eq!(
                technique.configuration(PassIndex::Z_PREPASS).unwrap().name(),
                format!("Zprepass{material}")
            );
        }
    }

    #[test]
    fn transparent_lit_material_adds_transparent_pass() {
        let (registry, _) = registered();
        let technique = build(&registry, "BlinnPhong", true);

        assert!(technique.has_configuration(PassIndex::LIGHTING_TRANSPARENT));
        assert_eq!(technique.active_pass_count(), 3);
        assert_eq!(
            technique
                .configuration(PassIndex::LIGHTING_TRANSPARENT)
                .unwrap()
                .name(),
            "LitOITBlinnPhong"
        );
    }

    #[test]
    fn volumetric_material_only_configures_volumetric_pass() {
        let (registry, library) = registered();
        let technique = build(&registry, VOLUMETRIC_MATERIAL, true);

        assert_eq!(
            technique.configured_passes().iter().collect::<Vec<_>>(),
            vec![PassIndex::LIGHTING_VOLUMETRIC]
        );
        assert!(library.contains("VolumetricOIT"));
    }

    #[test]
    fn configurations_point_into_shader_root() {
        let (_, library) = registered();
        assert_eq!(library.len(), 11);

        let configuration = library.configuration("ZprepassBlinnPhong").unwrap();
        assert_eq!(configuration.glsl_version(), "410");
        assert_eq!(
            configuration.shader(ShaderType::Vertex),
            Some(&ShaderSource::File(
                Path::new("Shaders/Materials/BlinnPhong/BlinnPhong.vert.glsl").to_path_buf()
            ))
        );
        assert_eq!(
            configuration.shader(ShaderType::Fragment),
            Some(&ShaderSource::File(
                Path::new("Shaders/Materials/BlinnPhong/BlinnPhongZPrepass.frag.glsl").to_path_buf()
            ))
        );
    }

    #[test]
    fn registering_twice_registers_nothing_new() {
        let (mut registry, mut library) = registered();
        assert_eq!(
            register_default_material_techniques(&mut registry, &mut library),
            0
        );
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn unregistering_removes_every_builder() {
        let (mut registry, _) = registered();
        registry.register(
            "Custom",
            Arc::new(|_: &mut RenderTechnique, _: bool| {}),
        );

        assert_eq!(unregister_default_material_techniques(&mut registry), 4);
        assert_eq!(registry.names(), vec!["Custom"]);
        assert_eq!(unregister_default_material_techniques(&mut registry), 0);
    }
}
