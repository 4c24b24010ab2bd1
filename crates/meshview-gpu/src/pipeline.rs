//! Graphics pipeline creation and shader loading.

use crate::error::{GpuError, Result};
use ash::vk;
use meshview_core::Vertex;
use std::path::Path;
use std::sync::Arc;

/// Read a SPIR-V module from disk.
pub fn load_shader(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|source| GpuError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    })?;
    spirv_from_bytes(&bytes, &path.display().to_string())
}

/// Validate and convert SPIR-V bytes into words.
pub fn spirv_from_bytes(bytes: &[u8], name: &str) -> Result<Vec<u32>> {
    let words = meshview_shaders::bytes_to_spirv(bytes).ok_or_else(|| {
        GpuError::ShaderCompilation(format!(
            "{name}: length {} is not a multiple of 4",
            bytes.len()
        ))
    })?;
    if !meshview_shaders::has_spirv_magic(&words) {
        return Err(GpuError::ShaderCompilation(format!(
            "{name}: missing SPIR-V magic number"
        )));
    }
    Ok(words)
}

/// The single vertex binding: one [`Vertex`] per element.
pub fn mesh_vertex_bindings() -> [vk::VertexInputBindingDescription; 1] {
    [vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }]
}

/// Position, normal and uv attributes; the tangent frame is not consumed.
pub fn mesh_vertex_attributes() -> [vk::VertexInputAttributeDescription; 3] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, position) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, normal) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, uv) as u32,
        },
    ]
}

/// Graphics pipeline configuration.
#[derive(Clone)]
pub struct GraphicsPipelineConfig {
    pub vertex_shader: Vec<u32>,
    pub fragment_shader: Vec<u32>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub samples: vk::SampleCountFlags,
    /// Minimum fraction of samples shaded individually; `None` disables
    /// sample shading.
    pub min_sample_shading: Option<f32>,
    /// Static viewport and scissor size.
    pub extent: vk::Extent2D,
    pub subpass: u32,
}

impl Default for GraphicsPipelineConfig {
    fn default() -> Self {
        Self {
            vertex_shader: Vec::new(),
            fragment_shader: Vec::new(),
            vertex_bindings: mesh_vertex_bindings().to_vec(),
            vertex_attributes: mesh_vertex_attributes().to_vec(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_test: true,
            depth_write: true,
            samples: vk::SampleCountFlags::TYPE_1,
            min_sample_shading: Some(0.2),
            extent: vk::Extent2D::default(),
            subpass: 0,
        }
    }
}

impl GraphicsPipelineConfig {
    /// Mesh pipeline reading `vertex.spv` and `fragment.spv` from `shader_dir`.
    pub fn mesh(
        shader_dir: &Path,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> Result<Self> {
        Ok(Self {
            vertex_shader: load_shader(&shader_dir.join(meshview_shaders::VERTEX_SHADER))?,
            fragment_shader: load_shader(&shader_dir.join(meshview_shaders::FRAGMENT_SHADER))?,
            extent,
            samples,
            ..Self::default()
        })
    }
}

/// Graphics pipeline wrapper.
pub struct GraphicsPipeline {
    device: Arc<ash::Device>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Create a graphics pipeline for a sub-pass of `render_pass`.
    pub fn new(
        device: Arc<ash::Device>,
        config: &GraphicsPipelineConfig,
        render_pass: vk::RenderPass,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Self> {
        let vert_module = create_shader_module(&device, &config.vertex_shader, "Vertex")?;
        let frag_module = match create_shader_module(&device, &config.fragment_shader, "Fragment")
        {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vert_module, None) };
                return Err(e);
            }
        };

        let result = unsafe {
            build_pipeline(
                &device,
                config,
                render_pass,
                descriptor_set_layouts,
                vert_module,
                frag_module,
            )
        };

        // Clean up shader modules
        unsafe {
            device.destroy_shader_module(vert_module, None);
            device.destroy_shader_module(frag_module, None);
        }

        let (pipeline, layout) = result?;
        tracing::debug!(
            "Graphics pipeline created ({}x{}, {:?})",
            config.extent.width,
            config.extent.height,
            config.samples
        );

        Ok(Self {
            device,
            pipeline,
            layout,
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

fn create_shader_module(
    device: &ash::Device,
    code: &[u32],
    stage: &str,
) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo::default().code(code);
    unsafe { device.create_shader_module(&info, None) }
        .map_err(|e| GpuError::ShaderCompilation(format!("{stage}: {e}")))
}

unsafe fn build_pipeline(
    device: &ash::Device,
    config: &GraphicsPipelineConfig,
    render_pass: vk::RenderPass,
    descriptor_set_layouts: &[vk::DescriptorSetLayout],
    vert_module: vk::ShaderModule,
    frag_module: vk::ShaderModule,
) -> Result<(vk::Pipeline, vk::PipelineLayout)> {
    // Shader stages
    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module)
            .name(c"main"),
    ];

    // Vertex input
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&config.vertex_bindings)
        .vertex_attribute_descriptions(&config.vertex_attributes);

    // Input assembly
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(config.topology)
        .primitive_restart_enable(false);

    // Viewport (static, rebuilt with the swapchain)
    let viewports = [vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: config.extent.width as f32,
        height: config.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }];
    let scissors = [vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: config.extent,
    }];
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewports(&viewports)
        .scissors(&scissors);

    // Rasterization
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(config.polygon_mode)
        .cull_mode(config.cull_mode)
        .front_face(config.front_face)
        .depth_bias_enable(false)
        .line_width(1.0);

    // Multisampling
    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(config.samples)
        .sample_shading_enable(config.min_sample_shading.is_some())
        .min_sample_shading(config.min_sample_shading.unwrap_or(0.0));

    // Depth stencil
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(config.depth_test)
        .depth_write_enable(config.depth_write)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    // Color blending
    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)];

    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    // Dynamic state
    let dynamic_states = [vk::DynamicState::LINE_WIDTH];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    // Pipeline layout
    let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(descriptor_set_layouts);

    let layout = device
        .create_pipeline_layout(&layout_info, None)
        .map_err(|e| GpuError::PipelineCreation(e.to_string()))?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(config.subpass);

    match device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) {
        Ok(pipelines) => Ok((pipelines[0], layout)),
        Err((_pipelines, e)) => {
            device.destroy_pipeline_layout(layout, None);
            Err(GpuError::PipelineCreation(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_shader(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "meshview-pipeline-{}-{name}",
            std::process::id()
        ));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn vertex_layout_matches_vertex_struct() {
        let [binding] = mesh_vertex_bindings();
        assert_eq!(binding.stride, 56);

        let attributes = mesh_vertex_attributes();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(attributes[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn missing_shader_reports_path() {
        let path = Path::new("/nonexistent/meshview/vertex.spv");
        match load_shader(path) {
            Err(GpuError::ShaderLoad { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected ShaderLoad, got {other:?}"),
        }
    }

    #[test]
    fn truncated_shader_is_rejected() {
        let path = temp_shader("truncated.spv", &[0x03, 0x02, 0x23, 0x07, 0x00]);
        let result = load_shader(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(GpuError::ShaderCompilation(_))));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        assert!(matches!(
            spirv_from_bytes(&[0, 0, 0, 0, 1, 0, 0, 0], "zeros"),
            Err(GpuError::ShaderCompilation(_))
        ));
    }

    #[test]
    fn valid_header_loads() {
        let mut bytes = meshview_shaders::SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let path = temp_shader("header.spv", &bytes);
        let words = load_shader(&path);
        std::fs::remove_file(&path).ok();
        assert_eq!(words.unwrap(), vec![meshview_shaders::SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn built_shaders_load_into_mesh_config() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let config = GraphicsPipelineConfig::mesh(
            &meshview_shaders::compiled_dir(),
            extent,
            vk::SampleCountFlags::TYPE_4,
        )
        .unwrap();
        assert_eq!(config.vertex_shader[0], meshview_shaders::SPIRV_MAGIC);
        assert_eq!(config.fragment_shader[0], meshview_shaders::SPIRV_MAGIC);
        assert_eq!(config.extent, extent);
        assert_eq!(config.samples, vk::SampleCountFlags::TYPE_4);
    }

    #[test]
    fn defaults_describe_mesh_pipeline() {
        let config = GraphicsPipelineConfig::default();
        assert_eq!(config.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(config.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(config.min_sample_shading, Some(0.2));
        assert_eq!(config.vertex_attributes.len(), 3);
    }
}
