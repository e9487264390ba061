// Memory type selection
//
// Every buffer and image gets its own dedicated allocation, so picking a
// memory type is a plain linear scan: first type allowed by the resource's
// mask whose flags cover what the caller asked for.

use ash::vk;
use crate::error::EngineError;

/// Find a suitable memory type index
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, EngineError> {
    for i in 0..memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32) {
        let has_type = (type_filter & (1 << i)) != 0;
        let has_properties = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(required);

        if has_type && has_properties {
            return Ok(i);
        }
    }

    Err(EngineError::NoSuitableHeap {
        type_bits: type_filter,
        required,
    })
}

#[cfg(test)]
pub(crate) fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
    let mut props = vk::PhysicalDeviceMemoryProperties {
        memory_type_count: types.len() as u32,
        memory_heap_count: 1,
        ..Default::default()
    };
    for (i, &flags) in types.iter().enumerate() {
        props.memory_types[i] = vk::MemoryType {
            property_flags: flags,
            heap_index: 0,
        };
    }
    props
}
